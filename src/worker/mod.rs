// SPDX-License-Identifier: Apache-2.0

//! The two host-owned thread pools (spec §4.D/§4.E, §5 "Two-pool design"):
//! a larger pool making blocking host syscalls, and a roughly
//! CPU-count-sized pool driving enclave entry. Kept as separate modules
//! since nothing but the configuration record and the `exiting` flag is
//! shared between them.

pub mod driver;
pub mod syscall_worker;
