pub mod entry;
pub mod feed;

pub use entry::{Entry, EntryFilter, NewEntry, ReadMark, ReadStateKey};
pub use feed::Feed;
