pub mod codec;
pub mod json;
pub mod messages;

pub use codec::{decode_row_set, encode_row_set, read_row_set, write_row_set};
pub use messages::{CellValue, RowSet, WireRow};
