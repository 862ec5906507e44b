pub mod check;
pub mod cursors;
pub mod run;
