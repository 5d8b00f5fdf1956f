//! Movement ledger: staging movements for a commit and reading them back.
//!
//! Appends are never written on their own. [`append`] stages a
//! movement into a `LedgerCommit` next to the quantity update it causes; the
//! store persists both in one atomic unit.

use tracing::instrument;

use stockledger_core::{MovementId, ReferenceId, TenantContext, TenantId};
use stockledger_inventory::{MovementDraft, ProductId, StockChange};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger_store::{
    LedgerCommit, LedgerStore, MovementFilter, MovementPage, PageRequest, PageSettings,
};

/// Read side of the ledger plus the movement staging rules.
#[derive(Debug, Clone)]
pub struct MovementLedger<S> {
    store: S,
    pages: PageSettings,
}

impl<S> MovementLedger<S>
where
    S: LedgerStore,
{
    pub fn new(store: S, pages: PageSettings) -> Self {
        Self { store, pages }
    }

    /// One page of movements, ascending by `(recorded_at, movement_id)`.
    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id), err)]
    pub async fn list(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
        page: PageRequest,
    ) -> LedgerResult<MovementPage> {
        if let (Some(from), Some(until)) = (filter.recorded_after, filter.recorded_before) {
            if from > until {
                return Err(LedgerError::Validation(
                    "recorded_after must not be later than recorded_before".to_string(),
                ));
            }
        }
        let limit = self.pages.limit_for(page.limit);
        Ok(self
            .store
            .list_movements(tenant_id, filter, page.after, limit)
            .await?)
    }

    /// Sum of every recorded delta of one product.
    pub async fn sum(&self, tenant_id: TenantId, product_id: ProductId) -> LedgerResult<i64> {
        Ok(self.store.ledger_sum(tenant_id, product_id).await?)
    }
}

/// Stage the movement for `change` into `commit`.
///
/// Fails with `Validation` if the delta does not match the kind's sign
/// rule, or if a transfer leg has no `reference_id`.
pub fn append(
    commit: LedgerCommit,
    ctx: &TenantContext,
    change: &StockChange,
    reference_id: Option<ReferenceId>,
    note: Option<String>,
) -> LedgerResult<LedgerCommit> {
    if commit.tenant_id != ctx.tenant_id() {
        return Err(LedgerError::NotFound);
    }
    let draft = MovementDraft {
        id: MovementId::new(),
        tenant_id: ctx.tenant_id(),
        product_id: change.product_id,
        kind: change.kind,
        quantity_delta: change.delta,
        quantity_after: change.quantity_after,
        actor_id: ctx.actor_id(),
        reference_id,
        note: normalize_note(note),
    };
    draft.validate()?;
    Ok(commit.append(change, draft))
}

fn normalize_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}
