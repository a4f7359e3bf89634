pub mod health;
pub mod tap;
pub mod top;
