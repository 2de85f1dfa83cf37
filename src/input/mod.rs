// SPDX-License-Identifier: Apache-2.0

mod file_id;
mod reader;
mod sessions;
mod tokenizer;

pub use file_id::FileId;
pub use reader::{FileReader, ReadOutcome, open_for_tail};
pub use sessions::{FileSessions, READ_CHUNK_SIZE};
pub use tokenizer::BufferedTokenizer;
