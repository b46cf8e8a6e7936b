pub mod assignment;
pub mod momentum;
pub mod scorer;
pub mod tier;
