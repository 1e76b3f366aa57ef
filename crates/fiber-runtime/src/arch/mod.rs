//! Architecture-specific context switching.
//!
//! Only x86_64 is implemented; other architectures fail to build rather
//! than link a stub that would corrupt a fiber's registers silently.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(not(target_arch = "x86_64"))]
compile_error!("fiber-runtime only implements context switching for x86_64");
