use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::validator::validate;

/// Resources on which `candidate` would be accepted, in input order.
///
/// Each resource is checked against its own entry in
/// `reservations_by_resource` (missing entry = no reservations) and the shared
/// `user_reservations`.
pub fn find_available(
    candidate: &Span,
    resources: &[Resource],
    reservations_by_resource: &HashMap<Ulid, Vec<Span>>,
    user_reservations: &[Span],
    now: Ms,
) -> Vec<Resource> {
    resources
        .iter()
        .filter(|resource| {
            let booked = reservations_by_resource
                .get(&resource.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            validate(candidate, resource, booked, user_reservations, now).is_ok()
        })
        .cloned()
        .collect()
}
