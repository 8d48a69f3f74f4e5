//! Local PlayReady support.
//!
//! Just enough of the protocol to build a SOAP license challenge from a
//! `.prd` device and to unwrap ECC-256 content keys out of XMR licenses.

/// PlayReady CDM: challenge building and license parsing.
pub mod cdm;
/// PlayReady device (.prd) parsing.
pub mod device;
/// ECC-256 primitives (ElGamal, ECDSA) over NIST P-256.
pub mod ecc;
/// WRM header extraction and the key message envelope.
pub mod header;
/// XMR license container parsing.
pub mod xmr;

pub use cdm::{Cdm, PlayReadyKey};
pub use device::Device;
