//! Groups, users, memberships, instance profiles and object permissions

use log::{debug, info};
use serde_json::{Value, json};

use crate::api::{AccessControl, Attributes, ComplexValue};

use super::super::context::{ADMINS_GROUP, ExportContext};
use super::super::entity::{Emit, Entity, Mode, SearchRequest};
use super::super::error::{ExportError, ExportResult};
use super::super::kind::{Dependency, KindDescriptor};
use super::{PERMISSIONS, last_segment, split_id, str_attr};

const GROUP: &str = "databricks_group";
const GROUP_MEMBER: &str = "databricks_group_member";
const USER: &str = "databricks_user";
const INSTANCE_PROFILE: &str = "databricks_instance_profile";
const GROUP_INSTANCE_PROFILE: &str = "databricks_group_instance_profile";

const USERS_GROUP: &str = "users";

/// Members above this count get progress logging
const LARGE_GROUP: usize = 10;

/// Object path prefix to the attribute naming the object
const PERMISSION_OBJECTS: &[(&str, &str)] = &[
    ("/clusters/", "cluster_id"),
    ("/jobs/", "job_id"),
    ("/instance-pools/", "instance_pool_id"),
    ("/cluster-policies/", "cluster_policy_id"),
    ("/repos/", "repo_id"),
];

static GROUP_MEMBER_DEPENDS: &[Dependency] = &[
    Dependency::id("group_id", GROUP),
    Dependency::id("member_id", USER),
    Dependency::id("member_id", GROUP),
];

static GROUP_INSTANCE_PROFILE_DEPENDS: &[Dependency] = &[
    Dependency::id("group_id", GROUP),
    Dependency::id("instance_profile_id", INSTANCE_PROFILE),
];

static PERMISSIONS_DEPENDS: &[Dependency] = &[
    Dependency::id("job_id", "databricks_job"),
    Dependency::id("cluster_id", "databricks_cluster"),
    Dependency::id("instance_pool_id", "databricks_instance_pool"),
    Dependency::id("cluster_policy_id", "databricks_cluster_policy"),
    Dependency::id("repo_id", "databricks_repo"),
    Dependency::attribute("access_control.user_name", USER, "user_name"),
    Dependency::attribute("access_control.group_name", GROUP, "display_name"),
];

pub fn kinds() -> Vec<KindDescriptor> {
    vec![
        KindDescriptor::new(GROUP, "groups")
            .with_name(group_name)
            .with_list(list_groups)
            .with_search(search_group)
            .with_read(read_group)
            .with_import(import_group),
        KindDescriptor::new(GROUP_MEMBER, "groups")
            .with_read(read_group_member)
            .with_depends(GROUP_MEMBER_DEPENDS),
        KindDescriptor::new(USER, "users")
            .with_name(user_name)
            .with_search(search_user)
            .with_read(read_user)
            .with_import(import_user),
        KindDescriptor::new(INSTANCE_PROFILE, "access")
            .with_name(instance_profile_name)
            .with_read(read_instance_profile),
        KindDescriptor::new(GROUP_INSTANCE_PROFILE, "access")
            .with_read(read_group_instance_profile)
            .with_depends(GROUP_INSTANCE_PROFILE_DEPENDS),
        KindDescriptor::new(PERMISSIONS, "access")
            .with_name(permissions_name)
            .with_read(read_permissions)
            .with_ignore(ignore_permissions)
            .with_depends(PERMISSIONS_DEPENDS),
    ]
}

/// Boolean attributes for the entitlements an identity holds
fn entitlement_flags(entitlements: &[ComplexValue], state: &mut Attributes) {
    for (entitlement, attribute) in [
        ("allow-cluster-create", "allow_cluster_create"),
        ("allow-instance-pool-create", "allow_instance_pool_create"),
        ("databricks-sql-access", "databricks_sql_access"),
    ] {
        if entitlements.iter().any(|e| e.value == entitlement) {
            state.insert(attribute.to_string(), Value::Bool(true));
        }
    }
}

fn group_name(_id: &str, state: &Attributes) -> String {
    str_attr(state, "display_name").to_string()
}

fn list_groups(ctx: &ExportContext) -> ExportResult<()> {
    for group in ctx.groups()?.iter() {
        if !ctx.matches_name(&group.display_name) {
            debug!("Group {} doesn't match the name filter", group.display_name);
            continue;
        }
        ctx.emit(Emit::new(GROUP, &group.id))?;
    }
    Ok(())
}

fn search_group(ctx: &ExportContext, request: &mut SearchRequest) -> ExportResult<()> {
    if request.attribute != "display_name" {
        return Ok(());
    }
    request.id = ctx
        .groups()?
        .iter()
        .find(|g| g.display_name == request.value)
        .map(|g| g.id.clone());
    Ok(())
}

fn read_group(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let groups = ctx.groups()?;
    let Some(group) = groups.iter().find(|g| g.id == id) else {
        return Ok(None);
    };
    let mut state = Attributes::new();
    state.insert("display_name".to_string(), json!(group.display_name));
    entitlement_flags(&group.entitlements, &mut state);
    Ok(Some(state))
}

fn import_group(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let display_name = str_attr(&entity.state, "display_name").to_string();
    if display_name == ADMINS_GROUP || display_name == USERS_GROUP {
        entity.mode = Mode::Data;
        entity.state = Attributes::new();
        entity
            .state
            .insert("display_name".to_string(), json!(display_name));
    }

    let groups = ctx.groups()?;
    let Some(group) = groups.iter().find(|g| g.id == entity.id()) else {
        return Ok(());
    };

    for role in &group.roles {
        ctx.emit(Emit::new(INSTANCE_PROFILE, &role.value))?;
        ctx.emit(Emit::new(
            GROUP_INSTANCE_PROFILE,
            format!("{}|{}", group.id, role.value),
        ))?;
    }

    if group.display_name == USERS_GROUP {
        info!("Skipping import of entire user directory");
        return Ok(());
    }

    for parent in &group.groups {
        ctx.emit(Emit::new(GROUP, &parent.value))?;
        if parent.kind == "direct" {
            ctx.emit(
                Emit::new(GROUP_MEMBER, format!("{}|{}", parent.value, group.id))
                    .with_name(format!("{}_{}", parent.display, group.display_name)),
            )?;
        }
    }

    let total = group.members.len();
    if total > LARGE_GROUP {
        info!("Importing {} members of {}", total, group.display_name);
    }
    for (offset, member) in group.members.iter().enumerate() {
        if member.reference.contains("Users/") {
            ctx.emit(Emit::new(USER, &member.value))?;
        }
        if member.reference.contains("Groups/") {
            ctx.emit(Emit::new(GROUP, &member.value))?;
            ctx.emit(
                Emit::new(GROUP_MEMBER, format!("{}|{}", group.id, member.value))
                    .with_name(format!("{}_{}", group.display_name, member.display)),
            )?;
        }
        if total > LARGE_GROUP {
            info!("Imported {} of {} members of {}", offset + 1, total, group.display_name);
        }
    }
    Ok(())
}

fn read_group_member(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let (group_id, member_id) = split_id(GROUP_MEMBER, id, "|")?;
    let groups = ctx.groups()?;
    let is_member = groups
        .iter()
        .find(|g| g.id == group_id)
        .is_some_and(|g| g.members.iter().any(|m| m.value == member_id));
    // Memberships seen from the member side may be missing from the group listing.
    let is_member = is_member
        || ctx
            .api()
            .get_user(member_id)
            .map_err(|e| ExportError::remote(GROUP_MEMBER, e))?
            .is_some_and(|u| u.groups.iter().any(|g| g.value == group_id));
    if !is_member {
        return Ok(None);
    }

    let mut state = Attributes::new();
    state.insert("group_id".to_string(), json!(group_id));
    state.insert("member_id".to_string(), json!(member_id));
    Ok(Some(state))
}

fn user_name(_id: &str, state: &Attributes) -> String {
    let name = str_attr(state, "user_name");
    name.split('@').next().unwrap_or(name).to_string()
}

fn search_user(ctx: &ExportContext, request: &mut SearchRequest) -> ExportResult<()> {
    if request.attribute != "user_name" {
        return Ok(());
    }
    request.id = ctx.find_user(&request.value)?.map(|u| u.id.clone());
    Ok(())
}

fn read_user(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let user = ctx.api().get_user(id).map_err(|e| ExportError::remote(USER, e))?;
    Ok(user.map(|user| {
        let mut state = Attributes::new();
        state.insert("user_name".to_string(), json!(user.user_name));
        if !user.display_name.is_empty() {
            state.insert("display_name".to_string(), json!(user.display_name));
        }
        if !user.active {
            state.insert("active".to_string(), Value::Bool(false));
        }
        entitlement_flags(&user.entitlements, &mut state);
        state
    }))
}

fn import_user(ctx: &ExportContext, entity: &mut Entity) -> ExportResult<()> {
    let name = str_attr(&entity.state, "user_name").to_string();
    let Some(user) = ctx.find_user(&name)? else {
        return Ok(());
    };
    for group in &user.groups {
        if group.kind != "direct" {
            debug!("Skipping non-direct group {}/{} for user {}", group.value, group.display, name);
            continue;
        }
        ctx.emit(Emit::new(GROUP, &group.value))?;
        ctx.emit(
            Emit::new(GROUP_MEMBER, format!("{}|{}", group.value, user.id))
                .with_name(format!("{}_{}", group.display, user.display_name)),
        )?;
    }
    Ok(())
}

fn instance_profile_name(id: &str, state: &Attributes) -> String {
    match str_attr(state, "instance_profile_arn") {
        "" => last_segment(id, '/').to_string(),
        arn => last_segment(arn, '/').to_string(),
    }
}

fn read_instance_profile(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let profiles = ctx.instance_profiles()?;
    Ok(profiles
        .iter()
        .find(|p| p.instance_profile_arn == id)
        .map(|p| {
            let mut state = Attributes::new();
            state.insert("instance_profile_arn".to_string(), json!(p.instance_profile_arn));
            if p.is_meta_instance_profile {
                state.insert("is_meta_instance_profile".to_string(), Value::Bool(true));
            }
            state
        }))
}

fn read_group_instance_profile(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let (group_id, profile) = split_id(GROUP_INSTANCE_PROFILE, id, "|")?;
    let groups = ctx.groups()?;
    let granted = groups
        .iter()
        .find(|g| g.id == group_id)
        .is_some_and(|g| g.roles.iter().any(|r| r.value == profile));
    if !granted {
        return Ok(None);
    }
    let mut state = Attributes::new();
    state.insert("group_id".to_string(), json!(group_id));
    state.insert("instance_profile_id".to_string(), json!(profile));
    Ok(Some(state))
}

fn permissions_name(id: &str, _state: &Attributes) -> String {
    last_segment(id, '/').to_string()
}

/// Principal attribute and name of one ACL entry
fn principal(entry: &AccessControl) -> Option<(&'static str, &str)> {
    if let Some(name) = &entry.user_name {
        return Some(("user_name", name));
    }
    if let Some(name) = &entry.group_name {
        return Some(("group_name", name));
    }
    entry
        .service_principal_name
        .as_deref()
        .map(|name| ("service_principal_name", name))
}

fn read_permissions(ctx: &ExportContext, id: &str) -> ExportResult<Option<Attributes>> {
    let Some((prefix, attribute)) = PERMISSION_OBJECTS
        .iter()
        .find(|(prefix, _)| id.starts_with(prefix))
    else {
        return Err(ExportError::parse(PERMISSIONS, id, "unsupported object type"));
    };
    let Some(acl) = ctx
        .api()
        .get_permissions(id)
        .map_err(|e| ExportError::remote(PERMISSIONS, e))?
    else {
        return Ok(None);
    };

    let mut entries = Vec::new();
    for entry in &acl.access_control_list {
        let Some((field, name)) = principal(entry) else {
            continue;
        };
        // Admins always hold full access; it cannot be managed.
        if field == "group_name" && name == ADMINS_GROUP {
            continue;
        }
        for permission in entry.all_permissions.iter().filter(|p| !p.inherited) {
            entries.push(json!({
                field: name,
                "permission_level": permission.permission_level,
            }));
        }
    }

    let mut state = Attributes::new();
    state.insert(attribute.to_string(), json!(&id[prefix.len()..]));
    state.insert("access_control".to_string(), Value::Array(entries));
    Ok(Some(state))
}

fn ignore_permissions(_ctx: &ExportContext, entity: &Entity) -> bool {
    entity
        .state
        .get("access_control")
        .and_then(Value::as_array)
        .is_none_or(|entries| entries.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::config::ExportConfig;
    use crate::exporter::entity::EntityKey;
    use crate::test_helpers::WorkspaceBuilder;

    fn entity(kind: &str, id: &str, state: Attributes) -> Entity {
        let mut e = Entity::new(EntityKey::new(kind, id));
        e.state = state;
        e
    }

    #[test]
    fn test_user_name_is_local_part() {
        let state = json!({"user_name": "ann@example.com"}).as_object().cloned().unwrap();
        assert_eq!(user_name("u1", &state), "ann");
    }

    #[test]
    fn test_builtin_groups_become_data() {
        let ctx = WorkspaceBuilder::new()
            .group("g-admins", "admins", &["u1"], &[])
            .user("u1", "ann@example.com")
            .context();

        let mut admins = entity(GROUP, "g-admins", read_group(&ctx, "g-admins").unwrap().unwrap());
        admins.state.insert("allow_cluster_create".into(), Value::Bool(true));
        import_group(&ctx, &mut admins).unwrap();

        assert_eq!(admins.mode, Mode::Data);
        assert_eq!(admins.state.len(), 1);
        assert_eq!(admins.state["display_name"], "admins");
        assert!(ctx.stage_of(&EntityKey::new(USER, "u1")).unwrap().is_some());
    }

    #[test]
    fn test_users_group_skips_member_directory() {
        let ctx = WorkspaceBuilder::new()
            .group("g-users", "users", &["u1", "u2"], &[])
            .context();

        let mut users = entity(GROUP, "g-users", read_group(&ctx, "g-users").unwrap().unwrap());
        import_group(&ctx, &mut users).unwrap();

        assert_eq!(users.mode, Mode::Data);
        assert!(ctx.state.lock().unwrap().queue.is_empty());
    }

    #[test]
    fn test_group_roles_emit_instance_profiles() {
        let ctx = WorkspaceBuilder::new()
            .group_with_role("g1", "etl", "arn:aws:iam::1:instance-profile/etl")
            .context();

        let mut group = entity(GROUP, "g1", read_group(&ctx, "g1").unwrap().unwrap());
        import_group(&ctx, &mut group).unwrap();

        assert!(
            ctx.stage_of(&EntityKey::new(INSTANCE_PROFILE, "arn:aws:iam::1:instance-profile/etl"))
                .unwrap()
                .is_some()
        );
        let link = read_group_instance_profile(&ctx, "g1|arn:aws:iam::1:instance-profile/etl")
            .unwrap()
            .unwrap();
        assert_eq!(link["group_id"], "g1");
    }

    #[test]
    fn test_instance_profiles_are_listed_once() {
        let (ctx, api) = WorkspaceBuilder::new()
            .instance_profile("arn:aws:iam::1:instance-profile/etl")
            .instance_profile("arn:aws:iam::1:instance-profile/ml")
            .context_and_api(ExportConfig::default());

        assert!(read_instance_profile(&ctx, "arn:aws:iam::1:instance-profile/etl").unwrap().is_some());
        assert!(read_instance_profile(&ctx, "arn:aws:iam::1:instance-profile/ml").unwrap().is_some());
        assert!(read_instance_profile(&ctx, "arn:aws:iam::1:instance-profile/gone").unwrap().is_none());
        assert_eq!(api.call_count("list_instance_profiles"), 1);
    }

    #[test]
    fn test_search_group_by_display_name() {
        let ctx = WorkspaceBuilder::new()
            .group("g1", "Data Scientists", &[], &[])
            .context();

        let mut hit = SearchRequest::new(GROUP, "display_name", "Data Scientists");
        search_group(&ctx, &mut hit).unwrap();
        assert_eq!(hit.id.as_deref(), Some("g1"));

        let mut miss = SearchRequest::new(GROUP, "display_name", "Analysts");
        search_group(&ctx, &mut miss).unwrap();
        assert!(miss.id.is_none());
    }

    #[test]
    fn test_user_import_follows_direct_groups_only() {
        let ctx = WorkspaceBuilder::new()
            .user("u1", "ann@example.com")
            .user_in_group("u1", "g-direct", "platform")
            .user_in_group_indirect("u1", "g-inherited", "everyone")
            .context();

        let mut user = entity(USER, "u1", read_user(&ctx, "u1").unwrap().unwrap());
        import_user(&ctx, &mut user).unwrap();

        assert!(ctx.stage_of(&EntityKey::new(GROUP, "g-direct")).unwrap().is_some());
        assert!(ctx.stage_of(&EntityKey::new(GROUP_MEMBER, "g-direct|u1")).unwrap().is_some());
        assert!(ctx.stage_of(&EntityKey::new(GROUP, "g-inherited")).unwrap().is_none());
    }

    #[test]
    fn test_read_permissions_drops_inherited_and_admins() {
        let ctx = WorkspaceBuilder::new()
            .permissions(
                "/jobs/11",
                &[
                    ("user", "ann@example.com", "CAN_MANAGE_RUN"),
                    ("group", "admins", "CAN_MANAGE"),
                ],
            )
            .inherited_permission("/jobs/11", "group", "everyone", "CAN_VIEW")
            .context();

        let state = read_permissions(&ctx, "/jobs/11").unwrap().unwrap();
        assert_eq!(state["job_id"], "11");
        let entries = state["access_control"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["user_name"], "ann@example.com");
        assert_eq!(entries[0]["permission_level"], "CAN_MANAGE_RUN");
    }

    #[test]
    fn test_permissions_of_unknown_object_type() {
        let ctx = WorkspaceBuilder::new().context_with(ExportConfig::default());
        let err = read_permissions(&ctx, "/notebooks/1").unwrap_err();
        assert!(matches!(err, ExportError::StructuralParse { .. }));
        assert!(read_permissions(&ctx, "/clusters/missing").unwrap().is_none());
    }

    #[test]
    fn test_ignore_empty_acl() {
        let ctx = WorkspaceBuilder::new().context();
        let empty = entity(PERMISSIONS, "/jobs/1", json!({"access_control": []}).as_object().cloned().unwrap());
        assert!(ignore_permissions(&ctx, &empty));
        let full = entity(
            PERMISSIONS,
            "/jobs/1",
            json!({"access_control": [{"user_name": "a", "permission_level": "CAN_VIEW"}]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(!ignore_permissions(&ctx, &full));
    }
}
