//! Command output rendering (colored text or JSON)

pub mod console;
pub mod formatter;
