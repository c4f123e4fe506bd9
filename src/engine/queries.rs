use std::time::Instant;

use futures::future::join_all;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::conflict::check_limits;
use super::validator::validate;
use super::{Engine, EngineError};

/// Ordering for resource listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceOrder {
    /// Ascending id; ULIDs sort by creation time to the millisecond.
    #[default]
    Created,
    /// Most recently reserved first; never-reserved resources last, oldest first.
    RecentlyReserved,
}

impl Engine {
    pub async fn resource(&self, id: Ulid) -> Option<Resource> {
        let rs = self.get_resource(&id)?;
        let guard = rs.read().await;
        Some(guard.resource.clone())
    }

    pub async fn list_resources(&self, order: ResourceOrder) -> Vec<Resource> {
        let mut resources = self.snapshot_resources().await;
        if order == ResourceOrder::RecentlyReserved {
            // Stable sort keeps creation order among ties.
            resources.sort_by(|a, b| b.last_reserved_at.cmp(&a.last_reserved_at));
        }
        resources
    }

    /// Resources owned by `owner_id`, in id order.
    pub async fn resources_owned_by(&self, owner_id: Ulid) -> Vec<Resource> {
        let mut resources = self.snapshot_resources().await;
        resources.retain(|r| r.owner_id == owner_id);
        resources
    }

    async fn snapshot_resources(&self) -> Vec<Resource> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut resources = Vec::with_capacity(handles.len());
        for rs in handles {
            resources.push(rs.read().await.resource.clone());
        }
        resources.sort_by_key(|r| r.id);
        resources
    }

    /// Reservations on a resource, sorted by start.
    pub async fn reservations_for_resource(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    /// Reservations held by a user across all resources, sorted by start.
    pub fn reservations_for_user(&self, user_id: Ulid) -> Vec<Reservation> {
        self.by_user
            .get(&user_id)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    /// Would `reserve` accept this right now? Evaluated on a snapshot without
    /// committing anything; a later `reserve` may still be rejected.
    pub async fn check_reservation(
        &self,
        resource_id: Ulid,
        user_id: Ulid,
        span: Span,
        now: Ms,
    ) -> Result<(), EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        let resource_busy: Vec<Span> = guard.overlapping(&span).map(|r| r.span).collect();
        let user_busy = self.user_spans_overlapping(&user_id, &span);
        validate(&span, &guard.resource, &resource_busy, &user_busy, now)?;
        check_limits(&span, &guard)
    }

    /// Every resource `user_id` could reserve for `span` right now, in id order.
    /// A resource is listed exactly when `reserve` on the same state would
    /// accept the span.
    ///
    /// Resources are evaluated concurrently, each under its own read lock.
    pub async fn find_available(&self, span: Span, user_id: Ulid, now: Ms) -> Vec<Resource> {
        let started = Instant::now();
        let user_busy = self.user_spans_overlapping(&user_id, &span);

        let mut handles: Vec<_> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        let user_busy = &user_busy;
        let checks = handles.into_iter().map(|(_, rs)| async move {
            let guard = rs.read().await;
            let busy: Vec<Span> = guard.overlapping(&span).map(|r| r.span).collect();
            let admitted = validate(&span, &guard.resource, &busy, user_busy, now).is_ok()
                && check_limits(&span, &guard).is_ok();
            admitted.then(|| guard.resource.clone())
        });
        let found: Vec<Resource> = join_all(checks).await.into_iter().flatten().collect();

        metrics::histogram!(observability::SEARCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        found
    }
}
