//! Mantis bug tracker (1.2 schema).
//!
//! Every source project collapses into the single output project. The
//! original project of an issue is kept either as a string custom field or
//! as a tag, see [`memberships`].
//!
//! Not migrated: filters, config, plugins, project hierarchy, project user
//! lists, sponsorships, tokens, user preferences, email queue, news and
//! project files.

use crate::config::MembershipMode;
use crate::core::{
    CleanPolicy, ColumnTemplate, ConflictPolicy, CredentialPolicy, EntityKind, FieldTemplate, GroupTarget,
    LinkTarget, MembershipRule, MigrationMode,
};

/// Column of `mantis_bug_history_table` bumped when a history row collides.
const HISTORY_INCREMENT: &str = "date_modified";

fn table(kind: &str) -> String {
    format!("mantis_{}_table", kind)
}

fn kind(name: &str) -> EntityKind {
    EntityKind::new(name, table(name))
}

/// Mantis entity kinds in declaration order.
pub fn entities() -> Vec<EntityKind> {
    let mut user = kind("user")
        .natural_key(&["username", "email"])
        .clean(CleanPolicy::Keep);
    user.credentials = Some(CredentialPolicy::new("password", "cookie_string"));

    let mut project = kind("project").clean(CleanPolicy::Keep);
    project.mode = MigrationMode::Collapse {
        name_column: "name".to_string(),
        name: None,
    };

    let scoped = || CleanPolicy::Scoped {
        column: "project_id".to_string(),
    };

    let mut bug_history = kind("bug_history")
        .references("user_id", "user")
        .references("bug_id", "bug");
    bug_history.on_unique_violation = Some(ConflictPolicy {
        increment: HISTORY_INCREMENT.to_string(),
        retries: 1,
    });

    vec![
        user,
        project,
        kind("bug_text"),
        kind("category")
            .natural_key(&["project_id", "name"])
            .references("project_id", "project")
            .references("user_id", "user")
            .clean(scoped()),
        kind("user_profile")
            .natural_key(&["user_id", "platform", "os", "os_build"])
            .references("user_id", "user")
            .clean(CleanPolicy::Keep),
        kind("bug")
            .references("project_id", "project")
            .references("reporter_id", "user")
            .references("handler_id", "user")
            .references("bug_text_id", "bug_text")
            .references("profile_id", "user_profile")
            .references("category_id", "category")
            .defers("duplicate_id", "bug")
            .guard(),
        kind("bugnote_text"),
        kind("bugnote")
            .references("bug_id", "bug")
            .references("reporter_id", "user")
            .references("bugnote_text_id", "bugnote_text"),
        kind("bug_file")
            .references("bug_id", "bug")
            .references("user_id", "user"),
        bug_history,
        kind("bug_monitor")
            .keyless()
            .references("user_id", "user")
            .references("bug_id", "bug"),
        kind("bug_relationship")
            .references("source_bug_id", "bug")
            .references("destination_bug_id", "bug"),
        kind("bug_revision")
            .references("bug_id", "bug")
            .references("bugnote_id", "bugnote")
            .references("user_id", "user"),
        kind("custom_field")
            .natural_key(&["name"])
            .clean(CleanPolicy::Keep),
        kind("custom_field_string")
            .keyless()
            .references("field_id", "custom_field")
            .references("bug_id", "bug"),
        kind("custom_field_project")
            .keyless()
            .natural_key(&["project_id", "field_id"])
            .references("field_id", "custom_field")
            .references("project_id", "project")
            .clean(scoped()),
        kind("project_version")
            .natural_key(&["project_id", "version"])
            .references("project_id", "project")
            .clean(scoped()),
        kind("tag").natural_key(&["name"]).references("user_id", "user"),
        kind("bug_tag")
            .keyless()
            .references("bug_id", "bug")
            .references("tag_id", "tag")
            .references("user_id", "user"),
    ]
}

/// Rules keeping the original project of each migrated issue.
pub fn memberships(mode: MembershipMode, field_name: &str) -> Vec<MembershipRule> {
    let rule = |name: &str, group: GroupTarget, link: LinkTarget| MembershipRule {
        name: name.to_string(),
        member_kind: "bug".to_string(),
        group_field: "project_id".to_string(),
        group_table: table("project"),
        group_key_column: "id".to_string(),
        group_label_column: "name".to_string(),
        group,
        link,
    };

    match mode {
        MembershipMode::None => Vec::new(),
        MembershipMode::CustomField => vec![rule(
            "project_field",
            GroupTarget {
                table: table("custom_field"),
                key: "id".to_string(),
                lookup: vec!["name".to_string()],
                columns: vec![
                    ColumnTemplate::new("name", FieldTemplate::value(field_name)),
                    ColumnTemplate::new("type", FieldTemplate::value(0i64)),
                    ColumnTemplate::new("possible_values", FieldTemplate::value("")),
                    ColumnTemplate::new("default_value", FieldTemplate::value("")),
                    ColumnTemplate::new("valid_regexp", FieldTemplate::value("")),
                ],
                on_create: vec![LinkTarget {
                    table: table("custom_field_project"),
                    columns: vec![
                        ColumnTemplate::new("field_id", FieldTemplate::GroupKey),
                        ColumnTemplate::new("project_id", FieldTemplate::OutputProject),
                        ColumnTemplate::new("sequence", FieldTemplate::value(0i64)),
                    ],
                }],
            },
            LinkTarget {
                table: table("custom_field_string"),
                columns: vec![
                    ColumnTemplate::new("field_id", FieldTemplate::GroupKey),
                    ColumnTemplate::new("bug_id", FieldTemplate::MemberKey),
                    ColumnTemplate::new("value", FieldTemplate::Label),
                ],
            },
        )],
        MembershipMode::Tags => vec![rule(
            "project_tags",
            GroupTarget {
                table: table("tag"),
                key: "id".to_string(),
                lookup: vec!["name".to_string()],
                columns: vec![
                    ColumnTemplate::new("user_id", FieldTemplate::value(0i64)),
                    ColumnTemplate::new("name", FieldTemplate::Label),
                    ColumnTemplate::new(
                        "description",
                        FieldTemplate::Format {
                            template: "Project was: {label}".to_string(),
                        },
                    ),
                    ColumnTemplate::new("date_created", FieldTemplate::Now),
                    ColumnTemplate::new("date_updated", FieldTemplate::Now),
                ],
                on_create: Vec::new(),
            },
            LinkTarget {
                table: table("bug_tag"),
                columns: vec![
                    ColumnTemplate::new("bug_id", FieldTemplate::MemberKey),
                    ColumnTemplate::new("tag_id", FieldTemplate::GroupKey),
                    ColumnTemplate::new("user_id", FieldTemplate::value(0i64)),
                    ColumnTemplate::new("date_attached", FieldTemplate::Now),
                ],
            },
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::validate_graph;
    use crate::engine::plan;

    #[test]
    fn test_graph_is_valid_and_plannable() {
        let kinds = entities();
        validate_graph(&kinds).unwrap();
        let plan = plan(&kinds).unwrap();
        let order = plan.order();
        assert_eq!(order.len(), 19);
        assert_eq!(order[0], "user");

        let pos = |k: &str| plan.position(k).unwrap();
        assert!(pos("project") < pos("category"));
        assert!(pos("user_profile") < pos("bug"));
        assert!(pos("category") < pos("bug"));
        assert!(pos("bug") < pos("bugnote"));
        assert!(pos("bugnote") < pos("bug_revision"));
        assert!(pos("custom_field") < pos("custom_field_string"));
        assert!(pos("tag") < pos("bug_tag"));
    }

    #[test]
    fn test_only_bugs_guard_the_destination() {
        let guards: Vec<String> = entities().into_iter().filter(|k| k.guard).map(|k| k.name).collect();
        assert_eq!(guards, vec!["bug"]);
    }

    #[test]
    fn test_duplicate_of_is_deferred() {
        let kinds = entities();
        let bug = kinds.iter().find(|k| k.name == "bug").unwrap();
        assert!(bug.foreign_key("duplicate_id").unwrap().deferred);
        assert_eq!(bug.table, "mantis_bug_table");
    }

    #[test]
    fn test_membership_modes() {
        assert!(memberships(MembershipMode::None, "Project").is_empty());

        let field = memberships(MembershipMode::CustomField, "Origin");
        assert_eq!(field[0].group.table, "mantis_custom_field_table");
        assert_eq!(
            field[0].group.columns[0].value,
            FieldTemplate::value("Origin")
        );
        assert_eq!(field[0].group.on_create.len(), 1);

        let tags = memberships(MembershipMode::Tags, "Origin");
        assert_eq!(tags[0].link.table, "mantis_bug_tag_table");
        assert!(tags[0].group.on_create.is_empty());
    }
}
