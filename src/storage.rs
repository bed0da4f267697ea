use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::{
    model::{RoleId, TenantId},
    permissions::RoleStore,
};

/// Configuración de servidor almacenada en JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRecord {
    pub guild_id: u64,
    pub music_role_id: Option<u64>,
}

/// Rol musical persistido como un archivo JSON por servidor
pub struct JsonRoleStore {
    data_dir: PathBuf,
}

impl JsonRoleStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        // Crear directorio de datos si no existe
        fs::create_dir_all(data_dir.join("servers")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    /// Guilds con un registro guardado
    pub async fn list_guilds(&self) -> Result<Vec<TenantId>> {
        let mut files = fs::read_dir(self.data_dir.join("servers")).await?;
        let mut guilds = Vec::new();

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(guild_id) = path
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("guild_"))
                    .and_then(|id| id.parse::<u64>().ok())
                {
                    guilds.push(TenantId(guild_id));
                }
            }
        }

        guilds.sort();
        Ok(guilds)
    }

    async fn load(&self, tenant: TenantId) -> Result<Option<GuildRecord>> {
        let path = self.file_path(tenant);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Registro corrupto para guild {}: {}", tenant, e);
                Ok(None)
            }
        }
    }

    async fn save(&self, record: &GuildRecord) -> Result<()> {
        let path = self.file_path(TenantId(record.guild_id));
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(record)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn file_path(&self, tenant: TenantId) -> PathBuf {
        self.data_dir.join("servers").join(format!("guild_{}.json", tenant))
    }
}

#[async_trait]
impl RoleStore for JsonRoleStore {
    async fn get(&self, tenant: TenantId) -> Result<Option<RoleId>> {
        Ok(self
            .load(tenant)
            .await?
            .and_then(|record| record.music_role_id)
            .map(RoleId))
    }

    async fn set(&self, tenant: TenantId, role: RoleId) -> Result<()> {
        let mut record = self.load(tenant).await?.unwrap_or(GuildRecord {
            guild_id: tenant.get(),
            music_role_id: None,
        });
        record.music_role_id = Some(role.get());
        self.save(&record).await?;

        info!("💾 Rol musical guardado para guild {}", tenant);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn role_survives_a_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRoleStore::new(dir.path().to_path_buf()).await.unwrap();

        assert_eq!(store.get(TenantId(1)).await.unwrap(), None);
        store.set(TenantId(1), RoleId(42)).await.unwrap();
        store.set(TenantId(1), RoleId(43)).await.unwrap();

        let reopened = JsonRoleStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reopened.get(TenantId(1)).await.unwrap(), Some(RoleId(43)));
        assert_eq!(reopened.get(TenantId(2)).await.unwrap(), None);
        assert_eq!(reopened.list_guilds().await.unwrap(), vec![TenantId(1)]);
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_unset() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRoleStore::new(dir.path().to_path_buf()).await.unwrap();
        fs::write(dir.path().join("servers").join("guild_5.json"), "{no es json")
            .await
            .unwrap();

        assert_eq!(store.get(TenantId(5)).await.unwrap(), None);
        store.set(TenantId(5), RoleId(1)).await.unwrap();
        assert_eq!(store.get(TenantId(5)).await.unwrap(), Some(RoleId(1)));
    }
}
