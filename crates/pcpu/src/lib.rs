#![allow(
    clippy::cast_possible_truncation, // instruction fields and containers are masked before narrowing
    clippy::cast_possible_wrap,       // addends and offsets are signed views of unsigned fields
    clippy::cast_sign_loss,           // immediates are reinterpreted as raw field bits
    clippy::missing_errors_doc        // every fallible operation returns crate::Error
)]

pub mod abi;
pub mod codegen;
pub mod driver;
pub mod error;
pub mod isa;
pub mod link;
pub mod mc;
pub mod reloc;
pub mod target;

/// Test harness module for writing unit and integration tests.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use error::{Error, Result};
pub use link::{LinkOptions, LinkedImage, Linker};
pub use mc::{ObjectFile, assemble};
pub use target::TargetConfig;
