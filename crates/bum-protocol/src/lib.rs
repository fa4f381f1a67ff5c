//! Wire protocol between the bum coordinator and front processes.
//!
//! The two processes share one duplex byte channel. Everything on it is a
//! [`Frame`]: a 12-byte native-endian header (message id, method or status
//! code, body length) followed by the body.
//!
//! - Requests flow front to coordinator and carry a [`Method`] code.
//! - Responses flow back under the same message id and carry a [`Status`].
//! - [`Method::Transcode`] replies are streams: any number of chunk frames
//!   ended by a frame with an empty body, whose status is the outcome.
//!
//! # Example
//!
//! ```rust
//! use bum_protocol::{pack_sequence, unpack_sequence};
//!
//! let packed = pack_sequence([b"thumb".as_slice(), b""]);
//! let items = unpack_sequence(&packed).unwrap();
//! assert_eq!(items, vec![b"thumb".to_vec(), Vec::new()]);
//! ```

mod codec;
mod error;
mod framing;
mod rpc;
mod types;

pub use codec::{CoverRecord, pack_sequence, read_cover_record, unpack_sequence, write_cover_record};
pub use error::{ProtocolError, ProtocolResult, RpcError, RpcResult};
pub use framing::{Frame, FrameWriter, HEADER_SIZE, read_frame, write_frame};
pub use rpc::{RpcClient, Subscription};
pub use types::{Method, Status};

/// Largest frame body either side will accept (512 MiB).
pub const MAX_BODY_SIZE: u32 = 512 * 1024 * 1024;
