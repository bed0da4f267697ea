//! # Permissions
//!
//! Who may control a tenant's playback, and the per-guild music role that
//! grants it.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    audio::queue::TenantQueue,
    error::ControlError,
    model::{Actor, RoleId, TenantId},
};

/// Persistent storage of each guild's music role.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get(&self, tenant: TenantId) -> Result<Option<RoleId>>;

    async fn set(&self, tenant: TenantId, role: RoleId) -> Result<()>;
}

/// Authorization rules for control operations.
pub struct PermissionGuard;

impl PermissionGuard {
    /// Administrators, the owner of the current session and holders of the
    /// guild's music role may control playback.
    pub fn authorize(actor: &Actor, queue: &TenantQueue, music_role: Option<RoleId>) -> bool {
        actor.administrator
            || queue.owner() == Some(actor.id)
            || music_role.is_some_and(|role| actor.has_role(role))
    }

    pub fn check(actor: &Actor, queue: &TenantQueue, music_role: Option<RoleId>) -> Result<(), ControlError> {
        if Self::authorize(actor, queue, music_role) {
            Ok(())
        } else {
            debug!("🚫 Usuario {} sin permisos en guild {}", actor.id, queue.tenant());
            Err(ControlError::NotAuthorized)
        }
    }
}

/// Process-wide cache of music roles in front of a [`RoleStore`].
///
/// Entries are loaded lazily on first reference (or preloaded at startup)
/// and refreshed on every explicit `set`. The engine only ever reads the
/// cache, so authorization never waits on storage.
pub struct RoleRegistry {
    store: Arc<dyn RoleStore>,
    roles: DashMap<TenantId, Option<RoleId>>,
}

impl RoleRegistry {
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self {
            store,
            roles: DashMap::new(),
        }
    }

    /// Cached role; `None` when unset or not loaded yet.
    pub fn cached(&self, tenant: TenantId) -> Option<RoleId> {
        self.roles.get(&tenant).and_then(|role| *role)
    }

    /// Loads the tenant's role from storage unless already cached.
    ///
    /// A storage failure is logged and leaves the entry unloaded, so
    /// authorization falls back to administrators and the session owner
    /// until the next attempt.
    pub async fn ensure_loaded(&self, tenant: TenantId) -> Option<RoleId> {
        if let Some(role) = self.roles.get(&tenant) {
            return *role;
        }

        match self.store.get(tenant).await {
            Ok(role) => {
                self.roles.insert(tenant, role);
                role
            }
            Err(e) => {
                warn!("⚠️ No se pudo leer el rol musical de guild {}: {}", tenant, e);
                None
            }
        }
    }

    pub async fn preload(&self, tenants: impl IntoIterator<Item = TenantId>) {
        let mut loaded = 0;
        for tenant in tenants {
            if self.ensure_loaded(tenant).await.is_some() {
                loaded += 1;
            }
        }
        info!("🎭 Roles musicales cargados: {}", loaded);
    }

    /// Sets the music role. Administrators only.
    pub async fn set(&self, actor: &Actor, tenant: TenantId, role: RoleId) -> Result<(), ControlError> {
        if !actor.administrator {
            return Err(ControlError::NotAuthorized);
        }

        self.store
            .set(tenant, role)
            .await
            .map_err(|e| ControlError::Storage(e.to_string()))?;
        self.roles.insert(tenant, Some(role));
        info!("🎭 Rol musical de guild {} establecido: {}", tenant, role);
        Ok(())
    }

    /// Drops the cached entry of a guild the bot left.
    pub fn forget(&self, tenant: TenantId) {
        self.roles.remove(&tenant);
    }
}
