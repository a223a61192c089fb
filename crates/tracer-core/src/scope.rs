//! # Scope Check
//!
//! Decides whether a site belongs to the program under test.
//!
//! Only code from the main executable is traced. Shared libraries, the
//! dynamic loader, and anything the host cannot place in an image are out of
//! scope. The check fails closed: when in doubt, the site is not traced.

use crate::engine::{HostEngine, RoutineInfo};
use crate::types::Address;

/// Whether `address` lies in the main executable.
///
/// Asks the host for the image containing the address. No image means out of
/// scope. Images never unload during a session, so the answer for a given
/// address does not change.
pub fn address_in_scope<H>(host: &H, address: Address) -> bool
where
    H: HostEngine + ?Sized,
{
    host.image_at(address).is_some_and(|image| image.is_main)
}

/// Whether `routine` belongs to the main executable.
///
/// A routine without a known owning image is out of scope.
#[must_use]
pub fn routine_in_scope(routine: &RoutineInfo) -> bool
{
    routine.image.as_ref().is_some_and(|image| image.is_main)
}
