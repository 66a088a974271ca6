//! Three-store disk block cache with probabilistic LRU eviction

use crate::clock::Clock;
use crate::codec::Codec;
use crate::context::Context;
use crate::engine::{KvIterator, KvStore};
use crate::error::{CacheError, CacheResult};
use crate::limiter::DiskLimiter;
use crate::types::{
    BlockId, BlockMetadata, FolderId, ServerKeyHalf, FOLDER_ID_LEN, SERVER_KEY_HALF_LEN,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Number of blocks evicted per pass when a put lands over the ceiling.
pub const DEFAULT_EVICT_COUNT: usize = 10;

/// How many random candidates to sample per block actually evicted. The
/// oldest of the sample are removed, so a larger factor approximates true
/// LRU more closely at the cost of more metadata reads.
const EVICTION_CONSIDERATION_FACTOR: usize = 3;

/// How many distinct folders to sample when choosing where to evict from.
const FOLDER_SAMPLE_COUNT: usize = 10;

/// Configuration of the disk block cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Byte ceiling for cached entries. Puts that land past it trigger an
    /// eviction pass; a single block larger than the whole ceiling is
    /// refused outright.
    pub max_bytes: u64,
    /// Seed for the eviction sampler, for reproducible tests. Random when
    /// unset.
    pub eviction_seed: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024 * 1024,
            eviction_seed: None,
        }
    }
}

impl CacheConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "cache max_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// State mutated only while holding the cache lock.
struct CacheState {
    rng: StdRng,
}

/// Persistent LRU cache of encrypted blocks over three injected stores.
///
/// `put`, `delete_by_folder`, and eviction serialize on one async lock so
/// eviction always sees consistent counters; `get` takes the lock only for
/// its LRU write-back. The byte and block counters are atomics so they can
/// be observed (by tests and by disk probes) without locking.
pub struct DiskBlockCache {
    config: CacheConfig,
    codec: Arc<dyn Codec>,
    clock: Arc<dyn Clock>,
    limiter: Arc<dyn DiskLimiter>,
    block_store: Box<dyn KvStore>,
    meta_store: Box<dyn KvStore>,
    folder_store: Box<dyn KvStore>,
    num_bytes: AtomicU64,
    num_blocks: AtomicU64,
    state: Mutex<CacheState>,
    shut_down: AtomicBool,
}

impl DiskBlockCache {
    /// Open a cache over the three stores.
    ///
    /// Scans the metadata store to rebuild the byte and block counters,
    /// reconciles the three namespaces (dropping records torn by a crash),
    /// and reports the surviving bytes to the limiter's cache tracker.
    pub fn new(
        config: CacheConfig,
        codec: Arc<dyn Codec>,
        clock: Arc<dyn Clock>,
        limiter: Arc<dyn DiskLimiter>,
        block_store: Box<dyn KvStore>,
        meta_store: Box<dyn KvStore>,
        folder_store: Box<dyn KvStore>,
    ) -> CacheResult<Self> {
        config.validate()?;
        let rng = match config.eviction_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let cache = Self {
            config,
            codec,
            clock,
            limiter,
            block_store,
            meta_store,
            folder_store,
            num_bytes: AtomicU64::new(0),
            num_blocks: AtomicU64::new(0),
            state: Mutex::new(CacheState { rng }),
            shut_down: AtomicBool::new(false),
        };
        cache.sync_counts_from_stores()?;
        let startup_bytes = cache.num_bytes.load(Ordering::SeqCst);
        if startup_bytes > 0 {
            cache
                .limiter
                .on_disk_block_cache_enable(startup_bytes as i64);
        }
        info!(
            "disk block cache opened with {} blocks / {} bytes",
            cache.num_blocks.load(Ordering::SeqCst),
            startup_bytes
        );
        Ok(cache)
    }

    /// Bytes currently cached (payloads plus key halves).
    pub fn num_bytes(&self) -> u64 {
        self.num_bytes.load(Ordering::SeqCst)
    }

    /// Blocks currently cached.
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks.load(Ordering::SeqCst)
    }

    /// Store a block. A duplicate put with an identical payload only
    /// refreshes the LRU time; a conflicting payload is refused. New
    /// entries are reported to the limiter first, and a put that lands
    /// over the cache's share triggers a synchronous eviction pass before
    /// returning.
    pub async fn put(
        &self,
        ctx: &Context,
        folder_id: FolderId,
        block_id: &BlockId,
        payload: &[u8],
        server_key_half: ServerKeyHalf,
    ) -> CacheResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().await;

        if let Some(entry) = self.block_store.get(block_id.as_bytes())? {
            let (existing_payload, _) = split_entry(block_id, &entry)?;
            if existing_payload == payload {
                trace!("duplicate put of block {block_id}, refreshing LRU");
                return self.refresh_lru(block_id);
            }
            return Err(CacheError::InconsistentBlock(block_id.clone()));
        }

        let entry_size = (payload.len() + SERVER_KEY_HALF_LEN) as u64;
        if entry_size > self.config.max_bytes {
            return Err(CacheError::OverCapacity(
                block_id.clone(),
                entry_size,
                self.config.max_bytes,
            ));
        }

        let available = self
            .limiter
            .before_disk_block_cache_put(ctx, entry_size as i64)
            .await?;

        let write_result = self.write_entry(folder_id, block_id, payload, server_key_half);
        self.limiter
            .after_disk_block_cache_put(entry_size as i64, write_result.is_ok());
        write_result?;

        if available < 0 || self.num_bytes() > self.config.max_bytes {
            let (removed, bytes_removed) =
                self.evict_locked(&mut state.rng, DEFAULT_EVICT_COUNT)?;
            debug!(
                "over cache ceiling after put of block {block_id}: evicted {removed} blocks / {bytes_removed} bytes"
            );
        }
        Ok(())
    }

    /// Fetch a block's payload and key half, refreshing its LRU time.
    pub async fn get(
        &self,
        ctx: &Context,
        folder_id: FolderId,
        block_id: &BlockId,
    ) -> CacheResult<(Bytes, ServerKeyHalf)> {
        self.check_open()?;
        ctx.check()?;
        let entry = self
            .block_store
            .get(block_id.as_bytes())?
            .ok_or_else(|| CacheError::NoSuchBlock(block_id.clone()))?;
        let (payload, key_half) = split_entry(block_id, &entry)?;
        let payload = Bytes::copy_from_slice(payload);

        {
            let _state = self.state.lock().await;
            self.refresh_lru(block_id)?;
        }
        trace!("served block {block_id} of folder {folder_id}");
        Ok((payload, key_half))
    }

    /// Delete the given blocks of one folder from all three stores. Ids
    /// not present are silently skipped. Returns how many blocks and bytes
    /// were removed.
    pub async fn delete_by_folder(
        &self,
        ctx: &Context,
        folder_id: FolderId,
        block_ids: &[BlockId],
    ) -> CacheResult<(usize, u64)> {
        self.check_open()?;
        ctx.check()?;
        let _state = self.state.lock().await;
        let (removed, bytes_removed) = self.remove_entries(block_ids)?;
        if bytes_removed > 0 {
            self.limiter.on_disk_block_cache_delete(bytes_removed as i64);
        }
        debug!("deleted {removed} blocks / {bytes_removed} bytes of folder {folder_id}");
        Ok((removed, bytes_removed))
    }

    /// Last access time of a block, or [`CacheError::NotFound`].
    pub fn lru_time(&self, block_id: &BlockId) -> CacheResult<DateTime<Utc>> {
        self.check_open()?;
        let encoded = self
            .meta_store
            .get(block_id.as_bytes())?
            .ok_or(CacheError::NotFound)?;
        Ok(self.decode_metadata(block_id, &encoded)?.lru_time)
    }

    /// Evict up to `count` blocks cache-wide: sample a handful of folders,
    /// pick one weighted by size, then remove the least recently used of a
    /// random sample within it. Returns blocks and bytes removed.
    pub async fn evict(&self, ctx: &Context, count: usize) -> CacheResult<(usize, u64)> {
        self.check_open()?;
        ctx.check()?;
        let mut state = self.state.lock().await;
        self.evict_locked(&mut state.rng, count)
    }

    /// Evict up to `count` blocks from one folder.
    pub async fn evict_from_folder(
        &self,
        ctx: &Context,
        folder_id: FolderId,
        count: usize,
    ) -> CacheResult<(usize, u64)> {
        self.check_open()?;
        ctx.check()?;
        let mut state = self.state.lock().await;
        self.evict_from_folder_locked(&mut state.rng, folder_id, count)
    }

    /// Shut the cache down and close its stores. Idempotent; operations
    /// after shutdown fail with [`CacheError::ShutDown`].
    pub async fn shutdown(&self, _ctx: &Context) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wait out any in-flight mutation before closing the stores.
        let _state = self.state.lock().await;
        for store in [&self.block_store, &self.meta_store, &self.folder_store] {
            if let Err(err) = store.close() {
                warn!("error closing cache store on shutdown: {err}");
            }
        }
        info!(
            "disk block cache shut down with {} blocks / {} bytes",
            self.num_blocks(),
            self.num_bytes()
        );
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_open(&self) -> CacheResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CacheError::ShutDown);
        }
        Ok(())
    }

    fn decode_metadata(&self, block_id: &BlockId, encoded: &[u8]) -> CacheResult<BlockMetadata> {
        self.codec.decode(encoded).map_err(|err| CacheError::Corrupted {
            block: block_id.clone(),
            detail: format!("undecodable metadata record: {err}"),
        })
    }

    /// Rebuild the in-memory counters from the metadata store and drop
    /// records a torn write left behind: payloads without metadata and
    /// index entries without metadata.
    fn sync_counts_from_stores(&self) -> CacheResult<()> {
        let mut live_ids: HashSet<Vec<u8>> = HashSet::new();
        let mut total_bytes = 0u64;
        let mut total_blocks = 0u64;

        let mut iter = self.meta_store.iter_from(&[])?;
        while let Some((key, value)) = iter.next_entry()? {
            let block_id = BlockId::new(key);
            let metadata = self.decode_metadata(&block_id, &value)?;
            total_bytes += u64::from(metadata.block_size);
            total_blocks += 1;
            live_ids.insert(block_id.as_bytes().to_vec());
        }

        let mut orphan_blocks = Vec::new();
        let mut iter = self.block_store.iter_from(&[])?;
        while let Some((key, _)) = iter.next_entry()? {
            if !live_ids.contains(&key) {
                orphan_blocks.push(key);
            }
        }
        let mut orphan_index = Vec::new();
        let mut iter = self.folder_store.iter_from(&[])?;
        while let Some((key, _)) = iter.next_entry()? {
            if key.len() < FOLDER_ID_LEN || !live_ids.contains(&key[FOLDER_ID_LEN..]) {
                orphan_index.push(key);
            }
        }
        if !orphan_blocks.is_empty() || !orphan_index.is_empty() {
            warn!(
                "dropping {} orphan payloads and {} orphan index entries from a torn write",
                orphan_blocks.len(),
                orphan_index.len()
            );
        }
        for key in orphan_blocks {
            self.block_store.delete(&key)?;
        }
        for key in orphan_index {
            self.folder_store.delete(&key)?;
        }

        self.num_bytes.store(total_bytes, Ordering::SeqCst);
        self.num_blocks.store(total_blocks, Ordering::SeqCst);
        Ok(())
    }

    /// Write a new entry to all three stores and bump the counters.
    /// Write order is payload, then metadata, then index, so a crash
    /// mid-way leaves an orphan payload rather than dangling metadata.
    fn write_entry(
        &self,
        folder_id: FolderId,
        block_id: &BlockId,
        payload: &[u8],
        server_key_half: ServerKeyHalf,
    ) -> CacheResult<()> {
        let mut entry = Vec::with_capacity(payload.len() + SERVER_KEY_HALF_LEN);
        entry.extend_from_slice(payload);
        entry.extend_from_slice(server_key_half.as_bytes());

        let metadata = BlockMetadata {
            folder_id,
            lru_time: self.clock.now(),
            block_size: entry.len() as u32,
        };
        let encoded = self
            .codec
            .encode(&metadata)
            .map_err(|err| CacheError::Codec(err.to_string()))?;

        self.block_store.put(block_id.as_bytes(), &entry)?;
        self.meta_store.put(block_id.as_bytes(), &encoded)?;
        self.folder_store
            .put(&folder_index_key(folder_id, block_id), &[])?;

        self.num_bytes.fetch_add(entry.len() as u64, Ordering::SeqCst);
        self.num_blocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Rewrite a block's metadata with a fresh LRU time. Metadata missing
    /// for a payload that was just read is corruption, not a miss.
    fn refresh_lru(&self, block_id: &BlockId) -> CacheResult<()> {
        let encoded = self
            .meta_store
            .get(block_id.as_bytes())?
            .ok_or_else(|| CacheError::Corrupted {
                block: block_id.clone(),
                detail: "metadata record missing for a cached payload".to_string(),
            })?;
        let mut metadata = self.decode_metadata(block_id, &encoded)?;
        metadata.lru_time = self.clock.now();
        let encoded = self
            .codec
            .encode(&metadata)
            .map_err(|err| CacheError::Codec(err.to_string()))?;
        self.meta_store.put(block_id.as_bytes(), &encoded)?;
        Ok(())
    }

    /// Remove the given blocks from all three stores, keyed off their
    /// metadata records; ids without metadata are skipped. Deletion order
    /// is the reverse of the write order.
    fn remove_entries(&self, block_ids: &[BlockId]) -> CacheResult<(usize, u64)> {
        let mut removed = 0usize;
        let mut bytes_removed = 0u64;
        for block_id in block_ids {
            let Some(encoded) = self.meta_store.get(block_id.as_bytes())? else {
                continue;
            };
            let metadata = self.decode_metadata(block_id, &encoded)?;
            self.folder_store
                .delete(&folder_index_key(metadata.folder_id, block_id))?;
            self.meta_store.delete(block_id.as_bytes())?;
            self.block_store.delete(block_id.as_bytes())?;
            self.num_bytes
                .fetch_sub(u64::from(metadata.block_size), Ordering::SeqCst);
            self.num_blocks.fetch_sub(1, Ordering::SeqCst);
            removed += 1;
            bytes_removed += u64::from(metadata.block_size);
        }
        Ok((removed, bytes_removed))
    }

    fn evict_locked(&self, rng: &mut StdRng, count: usize) -> CacheResult<(usize, u64)> {
        let folders = self.sample_folders(rng, FOLDER_SAMPLE_COUNT)?;
        if folders.is_empty() {
            return Ok((0, 0));
        }
        let weight_cap = count * EVICTION_CONSIDERATION_FACTOR;
        let mut weights = Vec::with_capacity(folders.len());
        for folder in &folders {
            weights.push(self.count_folder_blocks_capped(*folder, weight_cap)?);
        }
        let Some(folder) = weighted_choice(rng, &folders, &weights) else {
            return Ok((0, 0));
        };
        self.evict_from_folder_locked(rng, folder, count)
    }

    fn evict_from_folder_locked(
        &self,
        rng: &mut StdRng,
        folder_id: FolderId,
        count: usize,
    ) -> CacheResult<(usize, u64)> {
        if count == 0 {
            return Ok((0, 0));
        }
        let samples = count * EVICTION_CONSIDERATION_FACTOR;

        // Bounded walk first: a folder no bigger than the sample budget is
        // considered in full, which keeps small-folder eviction exact.
        // Only past the budget does random sampling take over.
        let mut walked = Vec::with_capacity(samples);
        let mut overflowed = false;
        {
            let mut iter = self.folder_store.iter_prefix(folder_id.as_bytes())?;
            while let Some((key, _)) = iter.next_entry()? {
                if walked.len() == samples {
                    overflowed = true;
                    break;
                }
                walked.push(BlockId::from_slice(&key[FOLDER_ID_LEN..]));
            }
        }
        let candidates = if overflowed {
            self.sample_folder_blocks(rng, folder_id, samples)?
        } else {
            walked
        };

        let mut ranked: Vec<(DateTime<Utc>, BlockId)> = Vec::with_capacity(candidates.len());
        for block_id in candidates {
            // An index entry can outlive its metadata across a torn
            // delete; such candidates are simply not evictable this round.
            let Some(encoded) = self.meta_store.get(block_id.as_bytes())? else {
                continue;
            };
            let metadata = self.decode_metadata(&block_id, &encoded)?;
            ranked.push((metadata.lru_time, block_id));
        }
        // Oldest first; equal times fall back to block id order so rounds
        // are deterministic under a seeded sampler.
        ranked.sort();
        let victims: Vec<BlockId> = ranked.into_iter().take(count).map(|(_, id)| id).collect();

        let (removed, bytes_removed) = self.remove_entries(&victims)?;
        if bytes_removed > 0 {
            self.limiter.on_disk_block_cache_delete(bytes_removed as i64);
        }
        debug!("evicted {removed} blocks / {bytes_removed} bytes from folder {folder_id}");
        Ok((removed, bytes_removed))
    }

    /// Collect up to `max_folders` distinct folder prefixes, walking the
    /// folder index from a random starting key and wrapping at the end.
    fn sample_folders(
        &self,
        rng: &mut StdRng,
        max_folders: usize,
    ) -> CacheResult<Vec<FolderId>> {
        let mut start = [0u8; FOLDER_ID_LEN];
        rng.fill_bytes(&mut start);

        let mut folders = Vec::new();
        let mut seen = HashSet::new();
        self.collect_folders(&start, None, max_folders, &mut seen, &mut folders)?;
        if folders.len() < max_folders {
            self.collect_folders(&[], Some(start), max_folders, &mut seen, &mut folders)?;
        }
        Ok(folders)
    }

    /// Walk folder prefixes from `start`, stopping at `stop_before` (if
    /// given), the end of the index, or once `max_folders` are collected.
    /// Each step seeks straight to the next prefix, so a huge folder costs
    /// the same as a tiny one.
    fn collect_folders(
        &self,
        start: &[u8],
        stop_before: Option<[u8; FOLDER_ID_LEN]>,
        max_folders: usize,
        seen: &mut HashSet<FolderId>,
        folders: &mut Vec<FolderId>,
    ) -> CacheResult<()> {
        let mut cursor = start.to_vec();
        while folders.len() < max_folders {
            let mut iter = self.folder_store.iter_from(&cursor)?;
            let Some((key, _)) = iter.next_entry()? else {
                break;
            };
            if let Some(stop) = stop_before {
                if key.as_slice() >= &stop[..] {
                    break;
                }
            }
            let Some(folder) = FolderId::from_slice(key.get(..FOLDER_ID_LEN).unwrap_or(&[]))
            else {
                // Malformed short key; step past it.
                cursor = key;
                cursor.push(0);
                continue;
            };
            if seen.insert(folder) {
                folders.push(folder);
            }
            match prefix_successor(folder) {
                Some(next) => cursor = next.to_vec(),
                None => break,
            }
        }
        Ok(())
    }

    /// Count index entries under a folder prefix, stopping at `cap` so a
    /// huge folder costs no more to weigh than the eviction it feeds.
    fn count_folder_blocks_capped(&self, folder_id: FolderId, cap: usize) -> CacheResult<usize> {
        let mut iter = self.folder_store.iter_prefix(folder_id.as_bytes())?;
        let mut count = 0;
        while count < cap && iter.next_entry()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Draw up to `samples` random positions within a folder's slice of
    /// the index and return the distinct block ids found there. Each draw
    /// seeks to a random key under the folder prefix and takes the next
    /// entry, wrapping to the folder's first entry when the draw lands
    /// past its last.
    fn sample_folder_blocks(
        &self,
        rng: &mut StdRng,
        folder_id: FolderId,
        samples: usize,
    ) -> CacheResult<Vec<BlockId>> {
        let prefix = folder_id.as_bytes();
        let mut ids = BTreeSet::new();
        for _ in 0..samples {
            let mut probe = [0u8; 32];
            rng.fill_bytes(&mut probe);
            let mut seek = Vec::with_capacity(FOLDER_ID_LEN + probe.len());
            seek.extend_from_slice(prefix);
            seek.extend_from_slice(&probe);

            let mut iter = self.folder_store.iter_from(&seek)?;
            let key = match iter.next_entry()? {
                Some((key, _)) if key.starts_with(prefix) => Some(key),
                _ => {
                    let mut iter = self.folder_store.iter_prefix(prefix)?;
                    iter.next_entry()?.map(|(key, _)| key)
                }
            };
            let Some(key) = key else {
                break;
            };
            ids.insert(BlockId::from_slice(&key[FOLDER_ID_LEN..]));
        }
        Ok(ids.into_iter().collect())
    }
}

/// Key of a folder-index entry: the folder id followed by the block id.
fn folder_index_key(folder_id: FolderId, block_id: &BlockId) -> Vec<u8> {
    let mut key = Vec::with_capacity(FOLDER_ID_LEN + block_id.len());
    key.extend_from_slice(folder_id.as_bytes());
    key.extend_from_slice(block_id.as_bytes());
    key
}

/// Split a block store entry into payload and key half.
fn split_entry<'a>(
    block_id: &BlockId,
    entry: &'a [u8],
) -> CacheResult<(&'a [u8], ServerKeyHalf)> {
    if entry.len() < SERVER_KEY_HALF_LEN {
        return Err(CacheError::Corrupted {
            block: block_id.clone(),
            detail: format!(
                "stored entry of {} bytes is shorter than a key half",
                entry.len()
            ),
        });
    }
    let (payload, half_bytes) = entry.split_at(entry.len() - SERVER_KEY_HALF_LEN);
    let key_half = ServerKeyHalf::from_slice(half_bytes).ok_or_else(|| CacheError::Corrupted {
        block: block_id.clone(),
        detail: "stored key half has the wrong length".to_string(),
    })?;
    Ok((payload, key_half))
}

/// Pick a folder at random, weighted by block count. `None` when every
/// weight is zero.
fn weighted_choice(
    rng: &mut StdRng,
    folders: &[FolderId],
    weights: &[usize],
) -> Option<FolderId> {
    let total: usize = weights.iter().sum();
    if total == 0 {
        return None;
    }
    let mut draw = rng.random_range(0..total);
    for (folder, weight) in folders.iter().zip(weights) {
        if draw < *weight {
            return Some(*folder);
        }
        draw -= weight;
    }
    None
}

/// Smallest folder id strictly greater than every key under `folder_id`'s
/// prefix, or `None` for the all-0xff id.
fn prefix_successor(folder_id: FolderId) -> Option<[u8; FOLDER_ID_LEN]> {
    let mut bytes = *folder_id.as_bytes();
    for i in (0..FOLDER_ID_LEN).rev() {
        if bytes[i] < 0xff {
            bytes[i] += 1;
            return Some(bytes);
        }
        bytes[i] = 0;
    }
    None
}
