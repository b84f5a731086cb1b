pub mod column;
pub mod evidence;
pub mod field;
pub mod issue;
pub mod order;
