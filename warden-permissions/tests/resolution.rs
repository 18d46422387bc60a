// SPDX-License-Identifier: MIT OR Apache-2.0

use warden_core::{FlagChange, PrincipalId, Query};
use warden_permissions::Target;
use warden_permissions::test_utils::memory_service;

fn principal(value: &str) -> PrincipalId {
    PrincipalId::new(value).unwrap()
}

#[tokio::test]
async fn admins_end_to_end() {
    let (_store, service) = memory_service().await.unwrap();

    service.create_group("Admins").await.unwrap();
    assert!(service.create_group("admins").await.is_err());

    let steam = principal("steam:123");
    let user = service.create_user(steam.clone()).await.unwrap();
    service
        .set_permission(Target::User(&user), "server.kick", true, true)
        .unwrap();

    assert!(service.has_permission(&steam, "server.kick").await.unwrap());
    assert!(service.has_permission(&steam, "Server.Kick").await.unwrap());

    // Falls through to the default group which has no entry.
    assert!(!service.has_permission(&steam, "server.ban").await.unwrap());
}

#[tokio::test]
async fn user_override_replaces_group_answer() {
    let (_store, service) = memory_service().await.unwrap();
    let default_group = service.default_group();
    service
        .set_permission(Target::Group(&default_group), "chat.global", false, true)
        .unwrap();

    let steam = principal("steam:1");
    let user = service.create_user(steam.clone()).await.unwrap();
    assert!(!service.has_permission(&steam, "chat.global").await.unwrap());

    service
        .set_permission(Target::User(&user), "chat.global", true, true)
        .unwrap();
    assert!(service.has_permission(&steam, "chat.global").await.unwrap());

    // Denying on the user level wins over a grant on the group level as well.
    service
        .set_permission(Target::Group(&default_group), "chat.local", true, true)
        .unwrap();
    service
        .set_permission(Target::User(&user), "chat.local", false, true)
        .unwrap();
    assert!(!service.has_permission(&steam, "chat.local").await.unwrap());

    // Unsetting the override falls back to the groups again.
    service
        .set_permission(Target::User(&user), "chat.local", FlagChange::Unset, true)
        .unwrap();
    assert!(service.has_permission(&steam, "chat.local").await.unwrap());
}

#[tokio::test]
async fn nearest_ancestor_wins() {
    let (_store, service) = memory_service().await.unwrap();
    let default_group = service.default_group();

    let staff = service.create_group("Staff").await.unwrap();
    let moderators = service.create_group("Moderators").await.unwrap();
    service
        .set_parent(&staff, Some(&default_group), true)
        .await
        .unwrap();
    service
        .set_parent(&moderators, Some(&staff), true)
        .await
        .unwrap();

    service
        .set_permission(Target::Group(&default_group), "server.mute", false, true)
        .unwrap();
    service
        .set_permission(Target::Group(&staff), "server.mute", true, true)
        .unwrap();

    let steam = principal("steam:2");
    let user = service.create_user(steam.clone()).await.unwrap();
    assert!(service.add_member(&moderators, &user).await.unwrap());

    assert!(service.has_permission(&steam, "server.mute").await.unwrap());

    // A nearer denial wins over the farther grant.
    service
        .set_permission(Target::Group(&moderators), "server.mute", false, true)
        .unwrap();
    assert!(!service.has_permission(&steam, "server.mute").await.unwrap());

    // Resolution is stable without mutations.
    for _ in 0..3 {
        assert!(!service.has_permission(&steam, "server.mute").await.unwrap());
    }
}

#[tokio::test]
async fn roots_fall_back_to_the_default_group() {
    let (_store, service) = memory_service().await.unwrap();
    let default_group = service.default_group();
    service
        .set_permission(Target::Group(&default_group), "chat.global", true, true)
        .unwrap();

    // "Guests" is a root of its own, not below the default group.
    let guests = service.create_group("Guests").await.unwrap();
    let steam = principal("steam:3");
    let user = service.create_user(steam.clone()).await.unwrap();
    service.add_member(&guests, &user).await.unwrap();

    assert!(service.has_permission(&steam, "chat.global").await.unwrap());
    assert!(service.resolve_group(&guests, &Query::parse("chat.global")));
}

#[tokio::test]
async fn unknown_principals_resolve_against_default_group() {
    let (store, service) = memory_service().await.unwrap();
    let default_group = service.default_group();
    service
        .set_permission(Target::Group(&default_group), "help.show", true, true)
        .unwrap();

    let nobody = principal("steam:404");
    assert!(service.has_permission(&nobody, "help.show").await.unwrap());
    assert!(!service.has_permission(&nobody, "server.kick").await.unwrap());

    // Misses are not cached, every check asks the store again.
    let finds = store.find_count();
    service.has_permission(&nobody, "help.show").await.unwrap();
    assert_eq!(store.find_count(), finds + 1);
}

#[tokio::test]
async fn wildcard_queries() {
    let (_store, service) = memory_service().await.unwrap();
    let admins = service.create_group("Admins").await.unwrap();
    service
        .set_permission(Target::Group(&admins), "server.kick", true, true)
        .unwrap();
    service
        .set_permission(Target::Group(&admins), "server.ban.temporary", false, true)
        .unwrap();

    let steam = principal("steam:4");
    let user = service.create_user(steam.clone()).await.unwrap();
    service.add_member(&admins, &user).await.unwrap();

    assert!(service.has_permission(&steam, "server.*").await.unwrap());
    assert!(service.has_any_permission(&steam, "server").await.unwrap());
    assert!(service.has_any_permission(&steam, "server.").await.unwrap());
    assert!(!service.has_any_permission(&steam, "server.ban").await.unwrap());
    assert!(!service.has_any_permission(&steam, "serv").await.unwrap());
    assert!(service.has_permission(&steam, "*").await.unwrap());

    // Any own entry below the prefix takes the decision away from the groups.
    service
        .set_permission(Target::User(&user), "server.stop", false, true)
        .unwrap();
    assert!(!service.has_any_permission(&steam, "server").await.unwrap());
    assert!(service.has_permission(&steam, "server.kick").await.unwrap());
}

#[tokio::test]
async fn effective_nodes_merge_nearest_last() {
    let (_store, service) = memory_service().await.unwrap();
    let default_group = service.default_group();
    let staff = service.create_group("Staff").await.unwrap();
    service
        .set_parent(&staff, Some(&default_group), true)
        .await
        .unwrap();

    service
        .set_permission(Target::Group(&default_group), "chat.global", true, true)
        .unwrap();
    service
        .set_permission(Target::Group(&default_group), "chat.mute", false, true)
        .unwrap();
    service
        .set_permission(Target::Group(&staff), "chat.mute", true, true)
        .unwrap();
    service
        .set_permission(Target::Group(&staff), "server.kick", true, true)
        .unwrap();

    let steam = principal("steam:5");
    let user = service.create_user(steam.clone()).await.unwrap();
    service.add_member(&staff, &user).await.unwrap();
    service
        .set_permission(Target::User(&user), "chat.global", false, true)
        .unwrap();

    let nodes = service.effective_nodes(&steam, "chat").await.unwrap();
    assert_eq!(
        nodes.into_iter().collect::<Vec<_>>(),
        vec![("chat.global".to_string(), false), ("chat.mute".to_string(), true)]
    );

    let all = service.effective_nodes(&steam, "").await.unwrap();
    assert_eq!(all.len(), 3);
}
