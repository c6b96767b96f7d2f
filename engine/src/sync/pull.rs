//! Pull phase: merge the server's collections into the store.

use super::report::SyncPhase;
use super::Pass;
use crate::error::Result;
use crate::model::{Entity, Link};
use crate::reconcile::{plan_pull, PullAction, SkipReason};
use crate::remote::{decode, raw_id, ListFilter};
use serde_json::Value;
use tracing::debug;

impl Pass<'_> {
    pub(super) async fn pull_kind<E: Entity>(&mut self) -> Result<()> {
        let listed = self
            .inner
            .remote
            .list(E::KIND, &ListFilter::default())
            .await;
        let values = match listed {
            Ok(values) => {
                self.reached_server = true;
                values
            }
            Err(err) => {
                self.remote_failed(&err);
                self.report
                    .issue(E::KIND, SyncPhase::Pull, None, None, err.to_string());
                return Ok(());
            }
        };

        debug!(kind = %E::KIND, count = values.len(), "pulling");
        for value in values {
            self.pull_one::<E>(value).await?;
        }
        Ok(())
    }

    async fn pull_one<E: Entity>(&mut self, value: Value) -> Result<()> {
        let store = &self.inner.store;
        let fallback_id = raw_id(&value);
        let inbound = match decode::<E::Wire>(value) {
            Ok(inbound) => inbound,
            Err(err) => {
                self.report.pull_counts(E::KIND).skipped += 1;
                self.report
                    .issue(E::KIND, SyncPhase::Pull, None, fallback_id, err.to_string());
                return Ok(());
            }
        };
        let server_id = inbound.id;

        let owner = match (E::KIND.owner(), E::wire_owner(&inbound.fields)) {
            (Some(owner_kind), Some(owner_server_id)) => {
                match store.local_id_of(owner_kind, owner_server_id).await? {
                    Some(owner) => Some(Link::new(owner, Some(owner_server_id.clone()))),
                    None if E::KIND.link_required() => {
                        debug!(
                            kind = %E::KIND,
                            %server_id,
                            reason = %SkipReason::UnknownOwner(owner_server_id.clone()),
                            "skipped"
                        );
                        self.report.pull_counts(E::KIND).skipped += 1;
                        return Ok(());
                    }
                    None => None,
                }
            }
            _ => None,
        };

        let data = match E::from_wire(inbound.fields, owner) {
            Ok(data) => data,
            Err(err) => {
                self.report.pull_counts(E::KIND).skipped += 1;
                self.report
                    .issue(E::KIND, SyncPhase::Pull, None, Some(server_id), err.to_string());
                return Ok(());
            }
        };

        let twin = store.find_by_server_id::<E>(&server_id).await?;
        let slot_holder = match (&twin, E::KIND.unique_daily(), data.link(), data.day()) {
            (None, true, Some(link), Some(day)) => store.find_in_slot::<E>(link.owner, day).await?,
            _ => None,
        };

        match plan_pull(data, twin.as_ref(), slot_holder.as_ref()) {
            PullAction::Insert(data) => {
                match store
                    .insert_pulled(&server_id, inbound.created_at, &data)
                    .await
                {
                    Ok(local_id) => {
                        debug!(kind = %E::KIND, %local_id, %server_id, "inserted from server");
                        self.report.pull_counts(E::KIND).inserted += 1;
                    }
                    // A local write took the slot or the id since we looked.
                    Err(err) if err.is_domain() => {
                        self.report.pull_counts(E::KIND).skipped += 1;
                        self.report
                            .issue(E::KIND, SyncPhase::Pull, None, Some(server_id), err.to_string());
                    }
                    Err(err) => return Err(err),
                }
            }
            PullAction::Refresh {
                local_id,
                revision,
                data,
            } => {
                match store.apply_pulled(local_id, revision, &data).await {
                    Ok(true) => {
                        debug!(kind = %E::KIND, %local_id, %server_id, "refreshed from server");
                        self.report.pull_counts(E::KIND).refreshed += 1;
                    }
                    Ok(false) => self.report.pull_counts(E::KIND).kept_local += 1,
                    // The server moved the record into a slot another local record holds.
                    Err(err) if err.is_domain() => {
                        self.report.pull_counts(E::KIND).skipped += 1;
                        self.report.issue(
                            E::KIND,
                            SyncPhase::Pull,
                            Some(local_id),
                            Some(server_id),
                            err.to_string(),
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
            PullAction::Unchanged => {}
            PullAction::KeepLocal(local_id) => {
                debug!(kind = %E::KIND, %local_id, %server_id, "kept unpushed local edit");
                self.report.pull_counts(E::KIND).kept_local += 1;
            }
            PullAction::Adopt(local_id) => {
                match store.adopt_server_id(E::KIND, local_id, &server_id).await {
                    Ok(true) => {
                        debug!(kind = %E::KIND, %local_id, %server_id, "adopted server id");
                        self.report.pull_counts(E::KIND).adopted += 1;
                    }
                    Ok(false) => self.report.pull_counts(E::KIND).skipped += 1,
                    Err(err) if err.is_domain() => {
                        self.report.pull_counts(E::KIND).skipped += 1;
                        self.report.issue(
                            E::KIND,
                            SyncPhase::Pull,
                            Some(local_id),
                            Some(server_id),
                            err.to_string(),
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
            PullAction::Skip(reason) => {
                self.report.pull_counts(E::KIND).skipped += 1;
                let local_id = match &reason {
                    SkipReason::SlotTaken { holder, .. } => Some(*holder),
                    SkipReason::UnknownOwner(_) => None,
                };
                self.report.issue(
                    E::KIND,
                    SyncPhase::Pull,
                    local_id,
                    Some(server_id),
                    reason.to_string(),
                );
            }
        }
        Ok(())
    }
}
