pub mod doctor;
pub mod promote;
