//! Computer records
//!
//! Every state transition is a check-and-set under one write guard, so racing
//! requests observe each other's writes in order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::Error;
use crate::persist::{load_state, persist_state};
use crate::schema::{paginate, ListResponse, Pagination};
use crate::Result;

use super::model::{Computer, ComputerStatus};

/// Outcome of claiming a computer for destruction.
#[derive(Debug)]
pub enum DestroyClaim {
    AlreadyDestroyed(Computer),
    Proceed(Computer),
}

#[derive(Clone)]
pub struct ComputerStore {
    computers: Arc<RwLock<HashMap<Uuid, Computer>>>,
    file_path: PathBuf,
}

impl ComputerStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        let file_path = base_dir.join("computers.json");
        let computers = load_state(&file_path).await?;
        Ok(Self {
            computers: Arc::new(RwLock::new(computers)),
            file_path,
        })
    }

    pub async fn insert(&self, computer: Computer) -> Result<Computer> {
        let mut computers = self.computers.write().await;
        computers.insert(computer.id, computer.clone());
        persist_state(&self.file_path, &*computers).await?;
        Ok(computer)
    }

    pub async fn get(&self, project_id: Uuid, id: Uuid) -> Result<Computer> {
        let computers = self.computers.read().await;
        computers
            .get(&id)
            .filter(|computer| computer.project_id == project_id && !computer.is_deleted())
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    pub async fn list(&self, project_id: Uuid, pagination: &Pagination) -> ListResponse<Computer> {
        let computers = self.computers.read().await;
        let owned = computers
            .values()
            .filter(|computer| computer.project_id == project_id && !computer.is_deleted())
            .cloned()
            .collect();
        paginate(owned, pagination)
    }

    /// Administrative listing, soft-deleted and failed records included.
    pub async fn list_including_deleted(&self, project_id: Uuid) -> Vec<Computer> {
        let computers = self.computers.read().await;
        let mut owned: Vec<Computer> = computers
            .values()
            .filter(|computer| computer.project_id == project_id)
            .cloned()
            .collect();
        owned.sort_by_key(|computer| computer.created_at);
        owned
    }

    pub async fn get_including_deleted(&self, id: Uuid) -> Option<Computer> {
        self.computers.read().await.get(&id).cloned()
    }

    pub async fn set_ttl(&self, project_id: Uuid, id: Uuid, ttl_seconds: Option<i64>) -> Result<Computer> {
        let mut computers = self.computers.write().await;
        let computer = computers
            .get_mut(&id)
            .filter(|computer| computer.project_id == project_id && !computer.is_deleted())
            .ok_or_else(|| not_found(id))?;
        if computer.status != ComputerStatus::Running {
            return Err(Error::Conflict(format!(
                "Computer {} is {:?} and can no longer be updated",
                id, computer.status
            )));
        }
        computer.ttl_seconds = ttl_seconds;
        computer.updated_at = Utc::now();

        let updated = computer.clone();
        persist_state(&self.file_path, &*computers).await?;
        Ok(updated)
    }

    /// Refresh liveness for a running computer presenting its heartbeat token.
    pub async fn record_heartbeat(&self, id: Uuid, token_hash: &str, now: DateTime<Utc>) -> Result<Computer> {
        let mut computers = self.computers.write().await;
        let computer = computers
            .get_mut(&id)
            .filter(|computer| !computer.is_deleted())
            .ok_or_else(|| not_found(id))?;
        let matches = computer
            .heartbeat_token_hash
            .as_bytes()
            .ct_eq(token_hash.as_bytes());
        if !bool::from(matches) {
            return Err(Error::unauthorized("Invalid heartbeat token"));
        }
        if computer.status != ComputerStatus::Running {
            return Err(Error::Conflict(format!(
                "Computer {} is {:?}; heartbeat ignored",
                id, computer.status
            )));
        }
        computer.last_heartbeat_at = Some(now);
        computer.updated_at = now;

        let updated = computer.clone();
        persist_state(&self.file_path, &*computers).await?;
        Ok(updated)
    }

    /// Move every overdue running computer to `Expiring` and return their ids.
    pub async fn mark_expiring_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut computers = self.computers.write().await;
        let mut due = Vec::new();
        for computer in computers.values_mut() {
            if !computer.is_deleted() && computer.is_overdue(now) {
                computer.status = ComputerStatus::Expiring;
                computer.updated_at = now;
                due.push(computer.id);
            }
        }
        if !due.is_empty() {
            persist_state(&self.file_path, &*computers).await?;
            info!(count = due.len(), "Computers marked expiring");
        }
        Ok(due)
    }

    /// Expiring computers plus destroys a previous teardown left unfinished.
    pub async fn pending_teardown(&self) -> Vec<Uuid> {
        let computers = self.computers.read().await;
        computers
            .values()
            .filter(|computer| {
                !computer.is_deleted()
                    && matches!(
                        computer.status,
                        ComputerStatus::Expiring | ComputerStatus::DestroyRequested
                    )
            })
            .map(|computer| computer.id)
            .collect()
    }

    /// Claim a computer for destruction.
    ///
    /// `project_id` scopes caller-initiated destroys; the sweeper passes `None`.
    /// Destroyed records are found even though they are soft-deleted, so a
    /// repeated destroy answers with the terminal record instead of NotFound.
    pub async fn claim_destroy(&self, project_id: Option<Uuid>, id: Uuid) -> Result<DestroyClaim> {
        let mut computers = self.computers.write().await;
        let computer = computers
            .get_mut(&id)
            .filter(|computer| project_id.map_or(true, |project_id| computer.project_id == project_id))
            .filter(|computer| computer.status != ComputerStatus::Failed)
            .ok_or_else(|| not_found(id))?;

        match computer.status {
            ComputerStatus::Destroyed => Ok(DestroyClaim::AlreadyDestroyed(computer.clone())),
            ComputerStatus::DestroyRequested => Ok(DestroyClaim::Proceed(computer.clone())),
            _ => {
                computer.status = ComputerStatus::DestroyRequested;
                computer.updated_at = Utc::now();
                let claimed = computer.clone();
                persist_state(&self.file_path, &*computers).await?;
                Ok(DestroyClaim::Proceed(claimed))
            }
        }
    }

    /// Mark destroyed and soft-delete, unless a concurrent destroy already did.
    pub async fn finish_destroy(&self, id: Uuid) -> Result<Computer> {
        let mut computers = self.computers.write().await;
        let computer = computers.get_mut(&id).ok_or_else(|| not_found(id))?;
        if computer.status == ComputerStatus::Destroyed {
            return Ok(computer.clone());
        }
        let now = Utc::now();
        computer.status = ComputerStatus::Destroyed;
        computer.destroyed_at = Some(now);
        computer.deleted_at = Some(now);
        computer.updated_at = now;

        let destroyed = computer.clone();
        persist_state(&self.file_path, &*computers).await?;
        info!(computer_id = %id, "Computer destroyed");
        Ok(destroyed)
    }
}

fn not_found(id: Uuid) -> Error {
    Error::not_found(format!("Computer {} not found", id))
}
