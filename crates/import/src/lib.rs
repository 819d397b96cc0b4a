//! Statement intake: decoding, row reconstruction, resident matching and
//! duplicate screening. Everything here is pure or CPU-bound; persistence and
//! workflow live in the storage and app crates.

pub mod csv;
pub mod decode;
pub mod duplicate;
pub mod hash;
pub mod layout;
pub mod match_engine;
pub mod normalize;
pub mod pdf;
pub mod pipeline;
pub mod reconstruct;
pub mod token;
pub(crate) mod util;

pub use csv::{CsvColumnMapping, CsvError, CsvImportProfile};
pub use decode::{decode, detect_format, DecodeError, Decoded};
pub use duplicate::{find_batch_duplicates, BatchDuplicate, CandidateTxn, DuplicateGuard, DuplicateVerdict};
pub use hash::file_hash;
pub use layout::{ColumnBand, ColumnKind, ColumnProfile};
pub use match_engine::{
    MatchDecision, MatchOutcome, MatchPolicy, RankedCandidate, ResidentMatcher, ReviewReason,
};
pub use normalize::{extract_reference, narration_key, normalize_narration, NormalizedNarration};
pub use pipeline::{parse_statement, parse_statement_blocking, ParseOptions, ParsedStatement, PipelineError};
pub use reconstruct::{reconstruct, reconstruct_with_profiles, ReconstructError};
pub use token::{TextToken, TokenStream};
pub use util::{parse_amount, parse_date, similarity};
