//! Shared fixtures for the session integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use image::DynamicImage;
use tokio::sync::watch;

use photo_swipe::cache::Tier;
use photo_swipe::library::{AssetSource, Permission, PermissionRequest, TargetSize};
use photo_swipe::state::data::{AssetId, AssetRef};
use photo_swipe::state::settings::SessionSettings;
use photo_swipe::{Result, SessionState, SwipeSession};

/// In-memory library whose fetches can be held at a gate.
///
/// While the gate is closed every `fetch_image` call is recorded and then
/// parks until `open()`; this lets a test hold the session in the middle
/// of a swipe.
pub struct GatedLibrary {
    assets: Vec<AssetRef>,
    fetches: Mutex<Vec<(AssetId, Tier)>>,
    list_calls: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl GatedLibrary {
    pub fn with_count(count: usize) -> Self {
        let assets = (0..count)
            .map(|i| {
                let created = Utc
                    .timestamp_opt(1_700_000_000 - i as i64 * 60, 0)
                    .single()
                    .unwrap();
                AssetRef::new(format!("img-{:03}", i), created)
            })
            .collect();
        let (gate, _) = watch::channel(true);
        Self {
            assets,
            fetches: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    pub fn ids(&self) -> HashSet<AssetId> {
        self.assets.iter().map(|a| a.id.clone()).collect()
    }

    pub fn close(&self) {
        self.gate.send_replace(false);
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn fetch_count_for(&self, id: &AssetId, tier: Tier) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, t)| a == id && *t == tier)
            .count()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetSource for GatedLibrary {
    async fn check_permission(&self) -> Permission {
        Permission::Authorized
    }

    async fn request_permission(&self) -> PermissionRequest {
        PermissionRequest::Granted
    }

    async fn list_image_assets(&self) -> Result<Vec<AssetRef>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.assets.clone())
    }

    async fn fetch_image(&self, asset: &AssetRef, size: TargetSize) -> Result<Option<DynamicImage>> {
        self.fetches
            .lock()
            .unwrap()
            .push((asset.id.clone(), size.tier));

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let edge = (size.long_edge_px / 100).max(1);
        Ok(Some(DynamicImage::new_rgb8(edge, edge)))
    }
}

pub fn settings(batch_size: usize) -> SessionSettings {
    SessionSettings {
        batch_size,
        ..SessionSettings::default()
    }
}

pub fn session(library: &Arc<GatedLibrary>, settings: SessionSettings) -> SwipeSession {
    SwipeSession::with_seed(Arc::clone(library) as Arc<dyn AssetSource>, settings, 42).unwrap()
}

/// Let spawned fetch tasks run to completion
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

/// Stack length rule that holds whenever the stack is not being rebuilt
pub fn assert_stack_window(session: &SwipeSession, batch_len: usize) {
    let snapshot = session.snapshot();
    if snapshot.is_preparing_stack {
        return;
    }
    let expected = 3.min(batch_len.saturating_sub(snapshot.current_index));
    assert_eq!(
        snapshot.visible_stack.len(),
        expected,
        "cursor {} of {} in {:?}",
        snapshot.current_index,
        batch_len,
        snapshot.state
    );
}

pub fn is_idle(session: &SwipeSession) -> bool {
    session.state() == SessionState::Idle
}
