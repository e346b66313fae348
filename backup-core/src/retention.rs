use crate::catalog::BackupCatalog;
use crate::error::Result;
use tracing::{debug, info, warn};

/// 按数量上限清理旧备份
#[derive(Debug, Clone, Copy)]
pub struct RetentionManager {
    max_backups: usize,
}

impl RetentionManager {
    /// `max_backups` 为 0 时不清理
    pub fn new(max_backups: usize) -> Self {
        Self { max_backups }
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// 删除超出上限的最旧备份，返回被删除的ID
    ///
    /// `protected` 中的ID不会被删除。单个备份删除失败只记录日志。
    pub fn enforce(&self, catalog: &BackupCatalog, protected: &[String]) -> Result<Vec<String>> {
        if self.max_backups == 0 {
            return Ok(Vec::new());
        }

        let backups = catalog.list()?;
        if backups.len() <= self.max_backups {
            debug!(
                "备份数量 {} 未超过上限 {}，无需清理",
                backups.len(),
                self.max_backups
            );
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for expired in &backups[self.max_backups..] {
            if protected.contains(&expired.id) {
                info!("备份 {} 正在使用中，本次不清理", expired.id);
                continue;
            }

            match catalog.delete(&expired.id) {
                Ok(_) => {
                    info!("清理过期备份: {}", expired.id);
                    removed.push(expired.id.clone());
                }
                Err(e) => warn!("清理备份 {} 失败: {}", expired.id, e),
            }
        }

        Ok(removed)
    }
}
