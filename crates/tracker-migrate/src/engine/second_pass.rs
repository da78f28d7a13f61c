//! Resolution of work that needs final destination keys.
//!
//! Two kinds of work are queued by the table migrator:
//!
//! - [`DeferredField`]: a reference column written as `0` because the
//!   referenced row had no destination key yet (self references such as
//!   "duplicate of").
//! - [`Attachment`]: link a migrated member row to a group derived from the
//!   source (the original project of an issue, kept as a tag or a custom
//!   field value after all projects were collapsed into one).

use std::collections::HashMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{
    ColumnTemplate, DestinationStore, FieldTemplate, MembershipRule, Predicate, Record, SourceQuery,
    SourceStore, SqlValue,
};
use crate::error::{MigrateError, Result};

use super::registry::Origin;
use super::translate::key_value;
use super::RunState;

/// A reference column to fill in once every kind is migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredField {
    pub kind: String,
    pub table: String,
    pub key_column: String,
    /// Source key of the row holding the field.
    pub source_key: i64,
    /// Destination key of the row holding the field.
    pub dest_key: i64,
    pub field: String,
    pub referenced: String,
    /// Source key the field pointed at.
    pub referenced_key: i64,
}

/// Attach one migrated member to its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Name of the [`MembershipRule`].
    pub rule: String,
    pub member_key: i64,
    /// Source key of the group (e.g. the issue's original project).
    pub group_source_key: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredWork {
    Field(DeferredField),
    Attach(Attachment),
}

/// Second-pass counters reported in the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecondPassStats {
    /// Deferred fields updated with their final key.
    pub resolved: u64,
    /// Deferred fields left as "no reference".
    pub defaulted: u64,
    /// Membership links inserted.
    pub attached: u64,
    /// Groups created for memberships.
    pub groups_created: u64,
    /// Updates or links that failed.
    pub failed: u64,
}

struct TemplateContext<'a> {
    label: &'a str,
    group_key: i64,
    member_key: i64,
    output_project: i64,
    now: i64,
}

/// Drains the deferred queue of a run.
pub struct SecondPass<'a> {
    source: &'a dyn SourceStore,
    destination: &'a dyn DestinationStore,
    memberships: &'a [MembershipRule],
    cancel: Option<&'a CancellationToken>,
    labels: HashMap<(String, i64), Option<String>>,
}

impl<'a> SecondPass<'a> {
    pub fn new(
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        memberships: &'a [MembershipRule],
    ) -> Self {
        Self {
            source,
            destination,
            memberships,
            cancel: None,
            labels: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Consume every queued item of `state`.
    pub async fn run(&mut self, state: &mut RunState) -> Result<SecondPassStats> {
        let queue = std::mem::take(&mut state.deferred);
        info!("Second pass: {} deferred items", queue.len());
        let mut stats = SecondPassStats::default();

        for work in queue {
            if self.cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(MigrateError::Cancelled);
            }
            match work {
                DeferredWork::Field(field) => self.resolve_field(&field, state, &mut stats).await?,
                DeferredWork::Attach(attach) => self.attach(&attach, state, &mut stats).await?,
            }
        }

        info!(
            "Second pass complete: {} resolved, {} defaulted, {} attached",
            stats.resolved, stats.defaulted, stats.attached
        );
        Ok(stats)
    }

    async fn resolve_field(
        &self,
        field: &DeferredField,
        state: &mut RunState,
        stats: &mut SecondPassStats,
    ) -> Result<()> {
        let Some(dest) = state.registry.try_resolve(&field.referenced, Some(field.referenced_key)) else {
            let msg = format!(
                "{} #{}: {} -> {} #{} was not migrated, left as no reference",
                field.kind, field.source_key, field.field, field.referenced, field.referenced_key
            );
            warn!("{}", msg);
            state.warnings.push(msg);
            stats.defaulted += 1;
            return Ok(());
        };

        let update = Record::new().with(field.field.clone(), dest);
        let result = async {
            let updated = self
                .destination
                .update(&field.table, &field.key_column, field.dest_key, &update)
                .await?;
            if updated == 0 {
                return Err(MigrateError::row(
                    field.kind.clone(),
                    Some(field.source_key),
                    format!(
                        "{} #{} no longer exists in {}, {} not updated",
                        field.key_column, field.dest_key, field.table, field.field
                    ),
                ));
            }
            self.destination.commit().await
        }
        .await;

        match result {
            Ok(()) => {
                debug!("{} #{}: {} = {}", field.kind, field.dest_key, field.field, dest);
                stats.resolved += 1;
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                error!("{} #{}: {}", field.kind, field.source_key, e);
                state.record_error(&field.kind, Some(field.source_key), &e);
                stats.failed += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn attach(&mut self, attach: &Attachment, state: &mut RunState, stats: &mut SecondPassStats) -> Result<()> {
        let memberships = self.memberships;
        let rule = memberships
            .iter()
            .find(|r| r.name == attach.rule)
            .ok_or_else(|| MigrateError::Config(format!("unknown membership rule '{}'", attach.rule)))?;

        let group_source = match attach.group_source_key {
            None | Some(0) => {
                debug!("{}: member {} has no group", rule.name, attach.member_key);
                return Ok(());
            }
            Some(key) => key,
        };

        let Some(label) = self.label(rule, group_source).await? else {
            let msg = format!(
                "{}: group {} #{} not found in source, member {} not attached",
                rule.name, rule.group_table, group_source, attach.member_key
            );
            warn!("{}", msg);
            state.warnings.push(msg);
            return Ok(());
        };

        let mut ctx = TemplateContext {
            label: &label,
            group_key: 0,
            member_key: attach.member_key,
            output_project: state.output_project_key.unwrap_or_default(),
            now: chrono::Utc::now().timestamp(),
        };

        let cache_kind = format!("membership:{}", rule.name);
        ctx.group_key = match state.registry.try_resolve(&cache_kind, Some(group_source)) {
            Some(key) => key,
            None => match self.find_or_create_group(rule, &ctx, stats).await {
                Ok(key) => {
                    state.registry.register(&cache_kind, group_source, key, Origin::Merged)?;
                    key
                }
                Err(e) if !e.is_fatal() => {
                    error!("{}: group '{}' for member {}: {}", rule.name, label, attach.member_key, e);
                    state.record_error(&rule.name, Some(attach.member_key), &e);
                    stats.failed += 1;
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
        };

        let link = render(&rule.link.columns, &ctx);
        let result = async {
            self.destination.insert(&rule.link.table, &link).await?;
            self.destination.commit().await
        }
        .await;

        match result {
            Ok(()) => {
                stats.attached += 1;
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                error!("{}: member {}: {}", rule.name, attach.member_key, e);
                state.record_error(&rule.name, Some(attach.member_key), &e);
                stats.failed += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a group row and the `on_create` rows written for it.
    async fn discard_group(&self, rule: &MembershipRule, key: i64, inserted: &[(&str, Record)]) -> Result<()> {
        for (table, row) in inserted.iter().rev() {
            let exact = Predicate::all(row.iter().map(|(c, v)| (c, v.clone())));
            self.destination.delete(table, &exact).await?;
        }
        self.destination
            .delete(&rule.group.table, &Predicate::eq(rule.group.key.clone(), key))
            .await?;
        self.destination.commit().await?;
        warn!("{}: discarded partially created {} #{}", rule.name, rule.group.table, key);
        Ok(())
    }

    /// Group label from the source, cached per group key.
    async fn label(&mut self, rule: &MembershipRule, group_source: i64) -> Result<Option<String>> {
        let cache_key = (rule.name.clone(), group_source);
        if let Some(label) = self.labels.get(&cache_key) {
            return Ok(label.clone());
        }

        let query = SourceQuery::table(&rule.group_table)
            .filter(Predicate::eq(rule.group_key_column.clone(), group_source));
        let rows = self.source.query(&query).await?;
        let label = rows
            .first()
            .and_then(|r| r.get(&rule.group_label_column))
            .filter(|v| !v.is_null())
            .map(SqlValue::lookup_key);

        self.labels.insert(cache_key, label.clone());
        Ok(label)
    }

    async fn find_or_create_group(
        &self,
        rule: &MembershipRule,
        ctx: &TemplateContext<'_>,
        stats: &mut SecondPassStats,
    ) -> Result<i64> {
        let group = &rule.group;
        let row = render(&group.columns, ctx);
        let lookup = Predicate::And(
            group
                .lookup
                .iter()
                .map(|c| Predicate::Eq(c.clone(), row.get(c).cloned().unwrap_or(SqlValue::Null)))
                .collect(),
        );

        let existing = self.destination.find(&group.table, &lookup).await?;
        match existing.as_slice() {
            [found] => Ok(key_value(&rule.name, &group.key, found.get(&group.key))?.unwrap_or_default()),
            [] => {
                let key = self.destination.insert(&group.table, &row).await?;
                let created = TemplateContext {
                    group_key: key,
                    ..*ctx
                };
                let mut inserted = Vec::with_capacity(group.on_create.len());
                for extra in &group.on_create {
                    let extra_row = render(&extra.columns, &created);
                    if let Err(e) = self.destination.insert(&extra.table, &extra_row).await {
                        self.discard_group(rule, key, &inserted).await?;
                        return Err(e);
                    }
                    inserted.push((extra.table.as_str(), extra_row));
                }
                self.destination.commit().await?;
                info!("{}: created {} #{} for '{}'", rule.name, group.table, key, ctx.label);
                stats.groups_created += 1;
                Ok(key)
            }
            rows => Err(MigrateError::AmbiguousMatch {
                kind: rule.name.clone(),
                key: lookup.to_string(),
                matches: rows.len(),
            }),
        }
    }
}

fn render(columns: &[ColumnTemplate], ctx: &TemplateContext<'_>) -> Record {
    let mut record = Record::new();
    for c in columns {
        let value = match &c.value {
            FieldTemplate::Value { value } => SqlValue::from(value),
            FieldTemplate::Label => SqlValue::Text(ctx.label.to_string()),
            FieldTemplate::Format { template } => SqlValue::Text(template.replace("{label}", ctx.label)),
            FieldTemplate::Now => SqlValue::Int(ctx.now),
            FieldTemplate::GroupKey => SqlValue::Int(ctx.group_key),
            FieldTemplate::MemberKey => SqlValue::Int(ctx.member_key),
            FieldTemplate::OutputProject => SqlValue::Int(ctx.output_project),
        };
        record.set(c.column.clone(), value);
    }
    record
}
