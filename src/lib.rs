//! Checks paired-operation contracts in compiled JVM method bodies.
//!
//! Some container APIs impose a protocol across two methods of the same
//! class: everything written to an `android/os/Parcel` in `writeToParcel`
//! must be read back in the same order by the reading constructor, and every
//! value saved into an `android/os/Bundle` under a key must be restored
//! under that same key. The compiler enforces none of this; mismatches
//! surface as corrupted state at runtime.
//!
//! The [`analysis`] module contains the engine: a stack-effect resolver that
//! recovers constant arguments from bytecode, a member associator that ties
//! container calls to the fields they transport, and two pairing policies
//! (ordered queues for positional containers, keyed maps for keyed ones)
//! that reconcile the two sides and report violations. The [`jvm`] module is
//! the loader-supplied view of classes the engine operates on, and
//! [`listing`] parses a textual method-listing format into that view.

pub mod analysis;
pub mod jvm;
pub mod listing;
