/*!
`syxfer` is a host-side transfer engine for hardware instruments reached over
MIDI System Exclusive messages. It presents a filesystem-like view of a
device's storages (samples, projects, sounds, sequences, the OS image) and
streams payloads in both directions with progress reporting and cooperative
cancellation.

Two protocol families are built in: the framed, 7-bit-packed, sequence-
numbered Elektron protocol, and the counter-tagged Arturia MicroBrute
protocol with its text-encoded sequences. Both plug into the same
[`backend::Backend`] through the [`connector::Connector`] registry, and both
expose their storages through the [`fs::Filesystem`] dispatch table.
!*/

#[macro_use]
mod error;

mod bytes;
mod text;

pub mod backend;
pub mod connector;
pub mod fs;
pub mod midi;
pub mod package;
pub mod progress;
pub mod sevenbit;
pub mod transfer;

pub use error::{Error, ErrorKind, Result};
