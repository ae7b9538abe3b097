//! Permission holders and the registry that owns them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── HolderRegistry ─────────────────────────┐
//! │  users: Uuid → Arc<PermissionHolder>                            │
//! │  groups: name → Arc<PermissionHolder>     tracks: TrackRegistry │
//! │  CalculatorFactory, ResolutionConfig                            │
//! └──────────────┬──────────────────────────────────▲───────────────┘
//!                │ owns                             │ Weak (HolderLink)
//!                ▼                                  │
//! ┌──────────────────── PermissionHolder ───────────┴───────────────┐
//! │  normal: RecordedNodeMap   transient: NodeMap   primary group   │
//! │  cached: CachedData ── computes via ──► InheritanceGraph walk   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Holders never point at each other. Inheritance nodes carry group
//! names, resolved through the registry whenever a traversal runs, so a
//! cycle between groups is just a repeated name the traversal skips.

mod id;
mod permission_holder;
mod registry;
mod resolve;
mod track;

pub use id::{HolderId, HolderType};
pub use permission_holder::PermissionHolder;
pub use registry::HolderRegistry;
pub use resolve::InheritanceGraph;
pub use track::TrackRegistry;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{NoPlatformDefaults, Tristate};
    use crate::config::{CachedDataConfig, ResolutionConfig};
    use crate::context::{ContextSet, Flag, QueryOptions};
    use crate::graph::TraversalAlgorithm;
    use crate::metastack::{MetaStackDefinition, StackElement};
    use crate::node::Node;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn registry_with(resolution: ResolutionConfig) -> Arc<HolderRegistry> {
        HolderRegistry::new(
            resolution,
            CachedDataConfig::default(),
            Arc::new(NoPlatformDefaults),
        )
    }

    fn registry() -> Arc<HolderRegistry> {
        registry_with(ResolutionConfig::default())
    }

    fn node(key: &str) -> Node {
        Node::builder(key).build().unwrap()
    }

    fn denied(key: &str) -> Node {
        Node::builder(key).value(false).build().unwrap()
    }

    fn inherit(group: &str) -> Node {
        Node::inheritance(group).build().unwrap()
    }

    fn global() -> QueryOptions {
        QueryOptions::global()
    }

    /// Builds the fixed weighted hierarchy under a fresh user:
    ///
    /// ```text
    /// user ─┬─ owner(13) ─ admin(12) ─ mod(11) ─ helper(10) ─ member(0)
    ///       └─ vip+(6) ─ vip(5) ─ member(0)
    /// ```
    fn weighted_tree(registry: &Arc<HolderRegistry>) -> Arc<PermissionHolder> {
        let edges = [
            ("owner", Some("admin"), 13),
            ("admin", Some("mod"), 12),
            ("mod", Some("helper"), 11),
            ("helper", Some("member"), 10),
            ("member", None, 0),
            ("vip+", Some("vip"), 6),
            ("vip", Some("member"), 5),
        ];
        for (name, parent, weight) in edges {
            let group = registry.get_or_create_group(name);
            if weight != 0 {
                group.set_node(Node::weight(weight).build().unwrap());
            }
            if let Some(parent) = parent {
                group.set_node(inherit(parent));
            }
        }
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("vip+"));
        user.set_node(inherit("owner"));
        user
    }

    fn order_names(registry: &HolderRegistry, user: &PermissionHolder) -> Vec<String> {
        registry
            .inheritance_order(user, &global())
            .iter()
            .map(|h| match h.id() {
                HolderId::Group(name) => name.clone(),
                HolderId::User(_) => "user".to_string(),
            })
            .collect()
    }

    // ============================================================
    // Section 1: Resolution scenarios
    // ============================================================

    #[test]
    fn test_end_to_end_default_group() {
        // Arrange
        let registry = registry();
        let default = registry.get_or_create_group("default");
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("default"));

        // Act
        default.set_node(node("a.b"));
        let data = user.get_permission_data(&global());

        // Assert
        assert_eq!(data.get_permission_value("a.b"), Tristate::True);
        assert_eq!(data.get_permission_value("a.c"), Tristate::Undefined);
    }

    #[test]
    fn test_heavier_group_wins_conflicting_permission() {
        // Arrange
        let registry = registry();
        let a = registry.get_or_create_group("group_a");
        let b = registry.get_or_create_group("group_b");
        a.set_node(Node::weight(10).build().unwrap());
        a.set_node(node("perm.x"));
        b.set_node(Node::weight(5).build().unwrap());
        b.set_node(denied("perm.x"));
        let user = registry.get_or_create_user(Uuid::new_v4());

        // Act: inherit the lighter group first
        user.set_node(inherit("group_b"));
        user.set_node(inherit("group_a"));

        // Assert
        assert_eq!(user.check_permission("perm.x", &global()), Tristate::True);
    }

    #[test]
    fn test_configured_weight_fallback_orders_groups() {
        let registry = registry_with(
            ResolutionConfig::default()
                .with_group_weight("low", 1)
                .with_group_weight("high", 2),
        );
        registry.get_or_create_group("low").set_node(denied("perm.y"));
        registry.get_or_create_group("high").set_node(node("perm.y"));
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("low"));
        user.set_node(inherit("high"));

        assert_eq!(user.check_permission("perm.y", &global()), Tristate::True);
        let high = registry.group("high").unwrap();
        assert_eq!(registry.holder_weight(&high), 2);
    }

    #[test]
    fn test_wildcard_and_explicit_negation() {
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(denied("perm.sub"));
        user.set_node(node("perm.*"));

        let data = user.get_permission_data(&global());

        assert_eq!(data.get_permission_value("perm.sub"), Tristate::False);
        assert_eq!(data.get_permission_value("perm.other"), Tristate::True);
    }

    #[test]
    fn test_own_nodes_beat_inherited_nodes() {
        let registry = registry();
        registry.get_or_create_group("default").set_node(node("fly"));
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("default"));
        user.set_node(denied("fly"));

        assert_eq!(user.check_permission("fly", &global()), Tristate::False);
    }

    #[test]
    fn test_transient_nodes_take_priority() {
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(denied("build"));

        user.set_transient_node(node("build"));

        assert_eq!(user.check_permission("build", &global()), Tristate::True);
        user.clear_transient_nodes();
        assert_eq!(user.check_permission("build", &global()), Tristate::False);
    }

    #[test]
    fn test_contextual_nodes_apply_only_in_their_context() {
        // Arrange
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(
            Node::builder("kit.vip")
                .with_context("server", "lobby")
                .build()
                .unwrap(),
        );
        let lobby = QueryOptions::contextual(ContextSet::of("server", "lobby").unwrap());
        let survival = QueryOptions::contextual(ContextSet::of("server", "survival").unwrap());

        // Act / Assert
        assert_eq!(user.check_permission("kit.vip", &lobby), Tristate::True);
        assert_eq!(user.check_permission("kit.vip", &survival), Tristate::Undefined);
    }

    #[test]
    fn test_missing_and_cyclic_groups_are_skipped() {
        // Arrange
        let registry = registry();
        let a = registry.get_or_create_group("a");
        let b = registry.get_or_create_group("b");
        a.set_node(inherit("b"));
        a.set_node(inherit("not_loaded"));
        b.set_node(inherit("a"));
        b.set_node(node("from.b"));
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("a"));

        // Act
        let names = order_names(&registry, &user);

        // Assert
        assert_eq!(names, vec!["user", "a", "b"]);
        assert_eq!(user.check_permission("from.b", &global()), Tristate::True);
    }

    #[test]
    fn test_expired_and_negated_inheritance_is_not_followed() {
        let registry = registry();
        registry.get_or_create_group("temp").set_node(node("temp.perm"));
        registry.get_or_create_group("neg").set_node(node("neg.perm"));
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(
            Node::inheritance("temp")
                .expiry(chrono::Utc::now() - chrono::Duration::seconds(5))
                .build()
                .unwrap(),
        );
        user.set_node(Node::inheritance("neg").value(false).build().unwrap());

        assert_eq!(order_names(&registry, &user), vec!["user"]);
        assert_eq!(user.check_permission("temp.perm", &global()), Tristate::Undefined);
        assert_eq!(user.check_permission("neg.perm", &global()), Tristate::Undefined);
    }

    #[test]
    fn test_resolve_inheritance_flag_off_uses_own_nodes_only() {
        let registry = registry();
        registry.get_or_create_group("default").set_node(node("inherited"));
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("default"));
        user.set_node(node("own"));
        let query = global().with_flag(Flag::ResolveInheritance, false);

        let data = user.get_permission_data(&query);

        assert_eq!(data.get_permission_value("own"), Tristate::True);
        assert_eq!(data.get_permission_value("inherited"), Tristate::Undefined);
    }

    // ============================================================
    // Section 2: Traversal through the registry
    // ============================================================

    #[test]
    fn test_depth_first_pre_order_through_registry() {
        let registry = registry();
        let user = weighted_tree(&registry);

        assert_eq!(
            order_names(&registry, &user),
            vec!["user", "owner", "admin", "mod", "helper", "member", "vip+", "vip"]
        );
    }

    #[test]
    fn test_breadth_first_with_post_sort_through_registry() {
        let registry = registry_with(
            ResolutionConfig::default()
                .with_traversal_algorithm(TraversalAlgorithm::BreadthFirst)
                .with_post_traversal_sort(true),
        );
        let user = weighted_tree(&registry);

        assert_eq!(
            order_names(&registry, &user),
            vec!["user", "owner", "admin", "mod", "helper", "vip+", "vip", "member"]
        );
    }

    #[test]
    fn test_inherits_group() {
        let registry = registry();
        let user = weighted_tree(&registry);

        assert!(user.inherits_group("Owner", &global()));
        assert!(!user.inherits_group("admin", &global()));
        assert!(registry.inherits_group_transitively(&user, "admin", &global()));
        assert!(!registry.inherits_group_transitively(&user, "unknown", &global()));
    }

    // ============================================================
    // Section 3: Meta
    // ============================================================

    #[test]
    fn test_prefix_tie_goes_to_first_encountered_group() {
        // Arrange
        let registry = registry();
        let a = registry.get_or_create_group("alpha");
        let b = registry.get_or_create_group("beta");
        a.set_node(Node::weight(20).build().unwrap());
        a.set_node(Node::prefix(10, "[Alpha]").build().unwrap());
        b.set_node(Node::weight(10).build().unwrap());
        b.set_node(Node::prefix(10, "[Beta]").build().unwrap());
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("beta"));
        user.set_node(inherit("alpha"));

        // Act
        let meta = user.get_meta_data(&global());

        // Assert
        assert_eq!(meta.get_prefix(), Some("[Alpha]"));
        assert_eq!(meta.get_weight(), 20);
        assert_eq!(meta.get_meta_value("weight"), Some("20"));
    }

    #[test]
    fn test_meta_primary_group_defaults_and_overrides() {
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());

        assert_eq!(user.get_meta_data(&global()).get_primary_group(), Some("default"));

        user.set_primary_group(Some("Staff"));
        let meta = user.get_meta_data(&global());
        assert_eq!(meta.get_primary_group(), Some("staff"));
        assert_eq!(meta.get_meta_value("primarygroup"), Some("staff"));
    }

    #[test]
    fn test_meta_nearest_value_first_and_track_filter() {
        // Arrange
        let prefix_stack = MetaStackDefinition::new(
            vec![StackElement::parse("highest_on_track_staff").unwrap()],
            Default::default(),
            "",
            " ",
            "",
        );
        let registry = registry_with(ResolutionConfig::default().with_prefix_stack(prefix_stack));
        registry.set_track("staff", ["mod"]);
        let m = registry.get_or_create_group("mod");
        let v = registry.get_or_create_group("vip");
        m.set_node(Node::prefix(5, "[Mod]").build().unwrap());
        m.set_node(Node::meta("color", "red").build().unwrap());
        v.set_node(Node::prefix(50, "[VIP]").build().unwrap());
        v.set_node(Node::meta("color", "gold").build().unwrap());
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("mod"));
        user.set_node(inherit("vip"));
        user.set_node(Node::meta("color", "blue").build().unwrap());

        // Act
        let meta = user.get_meta_data(&global());

        // Assert
        assert_eq!(meta.get_prefix(), Some("[Mod]"));
        assert_eq!(meta.get_meta_value("color"), Some("blue"));
        assert_eq!(meta.get_meta_multimap()["color"].len(), 3);
    }

    // ============================================================
    // Section 4: Mutation and invalidation
    // ============================================================

    #[test]
    fn test_group_change_invalidates_inheriting_users() {
        let registry = registry();
        let group = registry.get_or_create_group("default");
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("default"));
        assert_eq!(user.check_permission("late.perm", &global()), Tristate::Undefined);

        group.set_node(node("late.perm"));

        assert_eq!(user.check_permission("late.perm", &global()), Tristate::True);
    }

    #[test]
    fn test_set_node_reports_replacement() {
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(node("chat"));

        let diff = user.set_node(denied("chat"));

        assert_eq!(diff.added().len(), 1);
        assert_eq!(diff.removed().len(), 1);
        assert_eq!(user.nodes().len(), 1);
        assert!(user.set_node(denied("chat")).is_empty());
    }

    #[test]
    fn test_unset_node_and_exact() {
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(node("chat"));

        assert!(user.unset_node_exact(&denied("chat")).is_empty());
        assert_eq!(user.unset_node(&denied("chat")).removed().len(), 1);
        assert_eq!(user.check_permission("chat", &global()), Tristate::Undefined);
    }

    #[test]
    fn test_audit_temporary_nodes_removes_expired() {
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(
            Node::builder("short.lived")
                .expiry(chrono::Utc::now() - chrono::Duration::seconds(1))
                .build()
                .unwrap(),
        );
        user.set_node(node("kept"));

        let diff = user.audit_temporary_nodes();

        assert_eq!(diff.removed().len(), 1);
        assert_eq!(user.nodes().len(), 1);
        assert_eq!(registry.audit_temporary_nodes(), 0);
    }

    #[test]
    fn test_recorded_changes_are_exported() {
        let registry = registry();
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.load_nodes(vec![node("loaded")]);
        assert!(!user.normal_data().has_changes());

        user.set_node(node("added"));

        let changes = user.normal_data().export_changes(|_| true).unwrap();
        assert_eq!(changes.added().len(), 1);
    }

    #[test]
    fn test_unloaded_user_computes_empty_data() {
        let registry = registry();
        let uuid = Uuid::new_v4();
        let user = registry.get_or_create_user(uuid);
        user.set_node(node("perm"));

        registry.unload_user(&uuid);

        assert!(registry.user(&uuid).is_none());
        assert_eq!(user.check_permission("perm", &global()), Tristate::Undefined);
    }

    #[test]
    fn test_delete_group_removes_inheritance() {
        let registry = registry();
        registry.get_or_create_group("gone").set_node(node("gone.perm"));
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("gone"));
        assert_eq!(user.check_permission("gone.perm", &global()), Tristate::True);

        registry.delete_group("gone");

        assert_eq!(user.check_permission("gone.perm", &global()), Tristate::Undefined);
        assert!(!registry.is_group_loaded("gone"));
    }

    #[tokio::test]
    async fn test_reload_after_group_change() {
        let registry = registry();
        let group = registry.get_or_create_group("default");
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.set_node(inherit("default"));
        user.get_permission_data(&global());

        group.set_node(node("after.reload"));
        let data = user
            .cached_data()
            .reload_permissions(global())
            .await
            .unwrap();

        assert_eq!(data.get_permission_value("after.reload"), Tristate::True);
    }

    #[test]
    fn test_registry_cleanup_evicts_idle_entries() {
        let registry = HolderRegistry::new(
            ResolutionConfig::default(),
            CachedDataConfig::default().with_expire_after_access(Duration::from_millis(1)),
            Arc::new(NoPlatformDefaults),
        );
        let user = registry.get_or_create_user(Uuid::new_v4());
        user.get_permission_data(&global());
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(registry.perform_cleanup(), 1);
    }
}
