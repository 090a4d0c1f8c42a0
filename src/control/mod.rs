//! Control module - the optional `IDENTIFY` handshake.
//!
//! IDENTIFY is the only command with a JSON body. It is sent after the
//! protocol magic and before `SUB`.
//!
//! # Workflow
//!
//! 1. Client connects and writes the magic bytes
//! 2. Client sends `IDENTIFY` with its metadata
//! 3. Broker answers `OK`, or a JSON feature document if negotiation was asked for
//! 4. Client subscribes
//!
//! # Example
//!
//! ```
//! use qreader::control::{identify_command, parse_identify_response, IdentifyData};
//!
//! let cmd = identify_command(&IdentifyData::new("w1", "w1.local")).unwrap();
//! assert_eq!(cmd.name(), "IDENTIFY");
//! assert!(parse_identify_response(b"OK").unwrap().is_none());
//! ```

mod identify;

pub use identify::{
    identify_command, parse_identify_response, IdentifyData, NegotiatedFeatures, UNKNOWN_HOST,
};
