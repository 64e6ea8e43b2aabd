pub mod check;
pub mod simulate;
