use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_limits, find_conflicting_reservation};
use super::validator::{validate, RejectionReason};
use super::{Engine, EngineError, ReservationClaim, WalCommand};

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_resource(
        &self,
        id: Ulid,
        owner_id: Ulid,
        name: String,
        window: AvailabilityWindow,
    ) -> Result<(), EngineError> {
        let _compaction = self.compaction.read().await;
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        check_name(&name)?;

        let event = Event::ResourceCreated {
            id,
            owner_id,
            name: name.clone(),
            window,
            last_reserved_at: None,
        };
        let rs = Arc::new(RwLock::new(ResourceState::new(Resource {
            id,
            owner_id,
            name,
            window,
            last_reserved_at: None,
        })));
        // Publish the resource write-locked so nobody sees it before the WAL has it.
        let _guard = rs.clone().write_owned().await;
        match self.state.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(rs.clone());
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove_if(&id, |_, current| Arc::ptr_eq(current, &rs));
            return Err(e);
        }
        metrics::gauge!(observability::RESOURCES_ACTIVE).set(self.state.len() as f64);
        info!("resource {id} created, open {window}");
        Ok(())
    }

    /// Rename a resource or change its window. Owner only.
    ///
    /// Existing reservations stay as they are even if the new window no
    /// longer covers them.
    pub async fn update_resource(
        &self,
        id: Ulid,
        requester: Ulid,
        name: String,
        window: AvailabilityWindow,
    ) -> Result<(), EngineError> {
        check_name(&name)?;
        let _compaction = self.compaction.read().await;
        let mut guard = self.lock_resource_write(id).await?;
        if guard.resource.owner_id != requester {
            return Err(EngineError::NotOwner(id));
        }

        let event = Event::ResourceUpdated { id, name, window };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Delete a resource and all of its reservations. Owner only.
    /// Returns the number of reservations removed with it.
    pub async fn delete_resource(&self, id: Ulid, requester: Ulid) -> Result<usize, EngineError> {
        let _compaction = self.compaction.read().await;
        let guard = self.lock_resource_write(id).await?;
        if guard.resource.owner_id != requester {
            return Err(EngineError::NotOwner(id));
        }

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        self.forget_reservations(&guard);
        metrics::gauge!(observability::RESOURCES_ACTIVE).set(self.state.len() as f64);
        info!("resource {id} deleted with {} reservations", guard.reservations.len());
        Ok(guard.reservations.len())
    }

    /// Validate and commit a reservation in one exclusive section.
    ///
    /// The user's gate and the resource's write lock are held from the
    /// validation through the WAL append, so the decision is made against the
    /// state the reservation is committed into.
    pub async fn reserve(
        &self,
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        span: Span,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let claim = ReservationClaim::new(self, id, resource_id)?;
        let _compaction = self.compaction.read().await;
        let _user = self.lock_user(user_id).await;
        let mut guard = self.lock_resource_write(resource_id).await?;

        let started = Instant::now();
        let resource_busy: Vec<Span> = guard.overlapping(&span).map(|r| r.span).collect();
        let user_busy = self.user_spans_overlapping(&user_id, &span);
        let verdict = validate(&span, &guard.resource, &resource_busy, &user_busy, now);
        metrics::histogram!(observability::VALIDATION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            observability::RESERVATIONS_TOTAL,
            "outcome" => observability::outcome_label(&verdict)
        )
        .increment(1);

        if let Err(reason) = verdict {
            if reason == RejectionReason::ResourceConflict
                && let Some(existing) = find_conflicting_reservation(&span, guard.overlapping(&span))
            {
                debug!("reservation {id} on {resource_id} conflicts with {}", existing.id);
            } else {
                debug!("reservation {id} on {resource_id} rejected: {}", reason.code());
            }
            return Err(reason.into());
        }
        check_limits(&span, &guard)?;

        let event = Event::ReservationCreated {
            id,
            resource_id,
            user_id,
            span,
            reserved_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.commit();
        info!("reservation {id} accepted on {resource_id} for user {user_id}");
        Ok(Reservation {
            id,
            resource_id,
            user_id,
            span,
            reserved_at: now,
        })
    }

    /// Cancel a reservation. Allowed for the booking user and the resource owner.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        requester: Ulid,
    ) -> Result<Reservation, EngineError> {
        let resource_id = self
            .get_resource_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let _compaction = self.compaction.read().await;
        let mut guard = self.lock_resource_write(resource_id).await?;
        let reservation = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if requester != reservation.user_id && requester != guard.resource.owner_id {
            return Err(EngineError::NotOwner(id));
        }

        let event = Event::ReservationCancelled { id, resource_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {id} on {resource_id} cancelled");
        Ok(reservation)
    }

    /// Remove every reservation a user holds, across all resources.
    /// Called when the account service deletes the user.
    pub async fn delete_user_reservations(&self, user_id: Ulid) -> Result<usize, EngineError> {
        let _compaction = self.compaction.read().await;
        let _user = self.lock_user(user_id).await;

        let held: Vec<(Ulid, Ulid)> = self
            .by_user
            .get(&user_id)
            .map(|list| list.iter().map(|r| (r.id, r.resource_id)).collect())
            .unwrap_or_default();

        let mut removed = 0;
        for (id, resource_id) in held {
            let mut guard = match self.lock_resource_write(resource_id).await {
                Ok(guard) => guard,
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !guard.reservations.iter().any(|r| r.id == id) {
                continue;
            }
            let event = Event::ReservationCancelled { id, resource_id };
            self.persist_and_apply(&mut guard, &event).await?;
            removed += 1;
        }

        info!("removed {removed} reservations of user {user_id}");
        Ok(removed)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// Holds the compaction lock exclusively so no commit lands between the
    /// snapshot and the file swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction.write().await;
        // Every gate holder also holds the compaction lock, so none is in use.
        self.user_gates.clear();
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for rs in handles {
            let guard = rs.read().await;
            snapshots.push((guard.resource.clone(), guard.reservations.clone()));
        }
        snapshots.sort_by_key(|(resource, _)| resource.id);

        let mut events = Vec::new();
        for (resource, reservations) in snapshots {
            events.push(Event::ResourceCreated {
                id: resource.id,
                owner_id: resource.owner_id,
                name: resource.name,
                window: resource.window,
                last_reserved_at: resource.last_reserved_at,
            });
            for r in reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    resource_id: r.resource_id,
                    user_id: r.user_id,
                    span: r.span,
                    reserved_at: r.reserved_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
