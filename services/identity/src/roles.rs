//! Role, section and permission administration

use std::collections::BTreeMap;

use tracing::info;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{Grant, Permission, Principal, Role, Section};
use crate::repositories::{AccountRepository, RoleRepository};

#[derive(Clone)]
pub struct RoleAdmin<S> {
    store: S,
    default_role: String,
}

impl<S> RoleAdmin<S>
where
    S: RoleRepository + AccountRepository,
{
    pub fn new(store: S, default_role: impl Into<String>) -> Self {
        Self {
            store,
            default_role: default_role.into(),
        }
    }

    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    /// Id of the configured default role, if it has been created.
    pub async fn default_role_id(&self) -> IdentityResult<Option<Uuid>> {
        Ok(self
            .store
            .find_role_by_name(&self.default_role)
            .await?
            .map(|r| r.id))
    }

    pub async fn create_role(&self, role_name: &str) -> IdentityResult<Role> {
        let role = self
            .store
            .create_role(role_name.trim())
            .await
            .map_err(IdentityError::conflict_on("Role"))?;
        info!(role_id = %role.id, role = %role.role_name, "Role created");
        Ok(role)
    }

    pub async fn create_section(&self, section_name: &str) -> IdentityResult<Section> {
        let section = self
            .store
            .create_section(section_name.trim())
            .await
            .map_err(IdentityError::conflict_on("Section"))?;
        info!(section = %section.section_name, "Section created");
        Ok(section)
    }

    pub async fn create_permission(&self, permission_name: &str) -> IdentityResult<Permission> {
        let permission = self
            .store
            .create_permission(permission_name.trim())
            .await
            .map_err(IdentityError::conflict_on("Permission"))?;
        info!(permission = %permission.permission_name, "Permission created");
        Ok(permission)
    }

    async fn require_role(&self, role_id: Uuid) -> IdentityResult<Role> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound("Role not found".into()))
    }

    /// Replace the role's grants with `grants` (section → permissions).
    ///
    /// Every name is resolved before anything is written; prior grants not
    /// listed here are gone afterwards.
    pub async fn update_role_permissions(
        &self,
        role_id: Uuid,
        grants: BTreeMap<String, Vec<String>>,
    ) -> IdentityResult<Vec<Grant>> {
        self.require_role(role_id).await?;

        let mut pairs = Vec::new();
        for (section_name, permissions) in &grants {
            let section = self
                .store
                .find_section_by_name(section_name)
                .await?
                .ok_or_else(|| IdentityError::NotFound(format!("Section {section_name} not found")))?;
            for permission_name in permissions {
                let permission = self
                    .store
                    .find_permission_by_name(permission_name)
                    .await?
                    .ok_or_else(|| {
                        IdentityError::NotFound(format!("Permission {permission_name} not found"))
                    })?;
                if !pairs.contains(&(section.id, permission.id)) {
                    pairs.push((section.id, permission.id));
                }
            }
        }

        let written = self.store.replace_role_grants(role_id, pairs).await?;
        info!(%role_id, grants = written, "Role permissions replaced");
        self.list_role_grants(role_id).await
    }

    pub async fn list_role_grants(&self, role_id: Uuid) -> IdentityResult<Vec<Grant>> {
        self.require_role(role_id).await?;
        Ok(self.store.list_role_grants(role_id).await?)
    }

    pub async fn soft_delete_role(&self, role_id: Uuid) -> IdentityResult<()> {
        if !self.store.soft_delete_role(role_id).await? {
            return Err(IdentityError::NotFound("Role not found".into()));
        }
        info!(%role_id, "Role deleted");
        Ok(())
    }

    pub async fn assign_role(&self, principal: Principal, role_name: &str) -> IdentityResult<Role> {
        self.store
            .find_account(principal)
            .await?
            .ok_or_else(|| IdentityError::NotFound("Account not found".into()))?;
        let role = self
            .store
            .find_role_by_name(role_name)
            .await?
            .ok_or_else(|| IdentityError::NotFound("Role not found".into()))?;

        self.store.update_account_role(principal, Some(role.id)).await?;
        info!(%principal, role = %role.role_name, "Role assigned");
        Ok(role)
    }

    /// Take `role_name` away from `principal` and fall back to the default
    /// role. Removing the default role itself leaves the account unassigned.
    pub async fn remove_role(
        &self,
        principal: Principal,
        role_name: &str,
    ) -> IdentityResult<Option<Role>> {
        let account = self
            .store
            .find_account(principal)
            .await?
            .ok_or_else(|| IdentityError::NotFound("Account not found".into()))?;
        let role = self
            .store
            .find_role_by_name(role_name)
            .await?
            .ok_or_else(|| IdentityError::NotFound("Role not found".into()))?;

        if account.role_id != Some(role.id) {
            return Err(IdentityError::BadRequest(
                "Account does not hold this role".into(),
            ));
        }

        let fallback = match self.store.find_role_by_name(&self.default_role).await? {
            Some(default) if default.id != role.id => Some(default),
            _ => None,
        };

        self.store
            .update_account_role(principal, fallback.as_ref().map(|r| r.id))
            .await?;
        info!(
            %principal,
            removed = %role.role_name,
            fallback = fallback.as_ref().map(|r| r.role_name.as_str()).unwrap_or("none"),
            "Role removed"
        );
        Ok(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewAccount, PrincipalKind};
    use crate::repositories::MemoryStore;

    fn admin(store: &MemoryStore) -> RoleAdmin<MemoryStore> {
        RoleAdmin::new(store.clone(), "member")
    }

    async fn account(store: &MemoryStore) -> Principal {
        store
            .create_account(NewAccount {
                kind: PrincipalKind::User,
                email: Some("r@example.com".into()),
                phone: None,
                country_code: None,
                password_hash: "hash".into(),
                role_id: None,
            })
            .await
            .unwrap()
            .principal
    }

    fn grants(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(s, ps)| (s.to_string(), ps.iter().map(|p| p.to_string()).collect()))
            .collect()
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let store = MemoryStore::new();
        let roles = admin(&store);

        roles.create_role("editor").await.unwrap();
        assert!(matches!(
            roles.create_role("editor").await,
            Err(IdentityError::Conflict(_))
        ));
        roles.create_section("dashboard").await.unwrap();
        assert!(matches!(
            roles.create_section("dashboard").await,
            Err(IdentityError::Conflict(_))
        ));
        roles.create_permission("read").await.unwrap();
        assert!(matches!(
            roles.create_permission("read").await,
            Err(IdentityError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn role_permissions_are_replaced_not_merged() {
        let store = MemoryStore::new();
        let roles = admin(&store);
        let role = roles.create_role("editor").await.unwrap();
        for section in ["sectionA", "sectionB"] {
            roles.create_section(section).await.unwrap();
        }
        for permission in ["read", "write"] {
            roles.create_permission(permission).await.unwrap();
        }

        roles
            .update_role_permissions(role.id, grants(&[("sectionA", &["read"])]))
            .await
            .unwrap();
        let after = roles
            .update_role_permissions(role.id, grants(&[("sectionB", &["write"])]))
            .await
            .unwrap();

        assert_eq!(
            after,
            vec![Grant {
                section_name: "sectionB".into(),
                permission_name: "write".into(),
            }]
        );
        assert!(
            !store
                .role_grants_any(role.id, Some("sectionA"), &["read".to_string()])
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_names_fail_without_touching_grants() {
        let store = MemoryStore::new();
        let roles = admin(&store);
        let role = roles.create_role("editor").await.unwrap();
        roles.create_section("dashboard").await.unwrap();
        roles.create_permission("read").await.unwrap();
        roles
            .update_role_permissions(role.id, grants(&[("dashboard", &["read"])]))
            .await
            .unwrap();

        let err = roles
            .update_role_permissions(role.id, grants(&[("dashboard", &["fly"])]))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
        assert_eq!(roles.list_role_grants(role.id).await.unwrap().len(), 1);

        let missing = roles
            .update_role_permissions(Uuid::new_v4(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(missing, IdentityError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_role_falls_back_to_configured_default() {
        let store = MemoryStore::new();
        let roles = admin(&store);
        let member = roles.create_role("member").await.unwrap();
        roles.create_role("editor").await.unwrap();
        let principal = account(&store).await;

        roles.assign_role(principal, "editor").await.unwrap();
        let fallback = roles.remove_role(principal, "editor").await.unwrap();

        assert_eq!(fallback.map(|r| r.id), Some(member.id));
        let account = store.find_account(principal).await.unwrap().unwrap();
        assert_eq!(account.role_id, Some(member.id));
    }

    #[tokio::test]
    async fn removing_a_role_not_held_is_a_bad_request() {
        let store = MemoryStore::new();
        let roles = admin(&store);
        roles.create_role("member").await.unwrap();
        roles.create_role("editor").await.unwrap();
        let principal = account(&store).await;
        roles.assign_role(principal, "member").await.unwrap();

        let err = roles.remove_role(principal, "editor").await.unwrap_err();
        assert!(matches!(err, IdentityError::BadRequest(_)));
    }

    #[tokio::test]
    async fn deleted_role_cannot_be_found() {
        let store = MemoryStore::new();
        let roles = admin(&store);
        let role = roles.create_role("temp").await.unwrap();

        roles.soft_delete_role(role.id).await.unwrap();
        assert!(matches!(
            roles.soft_delete_role(role.id).await,
            Err(IdentityError::NotFound(_))
        ));
        assert!(matches!(
            roles.list_role_grants(role.id).await,
            Err(IdentityError::NotFound(_))
        ));
        // the name is free again
        roles.create_role("temp").await.unwrap();
    }
}
