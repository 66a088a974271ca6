//! Disk block cache scenario tests
//!
//! Exercises the cache end to end over in-memory stores with a
//! deterministic clock and a seeded eviction sampler: put/get/delete
//! round trips, LRU bookkeeping, ceiling-triggered eviction, the
//! statistical LRU quality of the probabilistic eviction, and crash
//! cleanup at startup.

use blockcache::cache::{CacheConfig, DiskBlockCache, DEFAULT_EVICT_COUNT};
use blockcache::clock::{Clock, TestClock};
use blockcache::codec::{Codec, JsonCodec};
use blockcache::context::Context;
use blockcache::engine::{KvIterator, KvStore, MemoryKvStore};
use blockcache::error::{CacheError, EngineError, LimiterError};
use blockcache::limiter::{
    BackpressureConfig, BackpressureLimiter, DiskProbe, FixedDiskProbe, TokioDelayer,
    UnlimitedQuota,
};
use blockcache::types::{
    BlockId, BlockMetadata, FolderId, ServerKeyHalf, SERVER_KEY_HALF_LEN,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PAYLOAD_LEN: usize = 64;
const ENTRY_SIZE: u64 = (PAYLOAD_LEN + SERVER_KEY_HALF_LEN) as u64;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    cache: DiskBlockCache,
    clock: Arc<TestClock>,
    limiter: Arc<BackpressureLimiter>,
    block_store: MemoryKvStore,
    meta_store: MemoryKvStore,
    folder_store: MemoryKvStore,
}

fn limiter_config() -> BackpressureConfig {
    BackpressureConfig {
        min_threshold: 0.5,
        max_threshold: 0.95,
        quota_min_threshold: 0.95,
        quota_max_threshold: 1.2,
        journal_frac: 0.25,
        disk_cache_frac: 0.25,
        byte_limit: 1 << 30,
        file_limit: 10_000,
        max_delay: Duration::from_secs(1),
    }
}

fn build_harness_on(
    max_bytes: u64,
    probe: Arc<dyn DiskProbe>,
    block_store: MemoryKvStore,
    meta_store: MemoryKvStore,
    folder_store: MemoryKvStore,
) -> Harness {
    let clock = Arc::new(TestClock::new());
    let limiter = Arc::new(
        BackpressureLimiter::new(
            limiter_config(),
            Arc::new(TokioDelayer),
            probe,
            Arc::new(UnlimitedQuota),
        )
        .unwrap(),
    );
    let cache = DiskBlockCache::new(
        CacheConfig {
            max_bytes,
            eviction_seed: Some(0xCAFE),
        },
        Arc::new(JsonCodec),
        clock.clone(),
        limiter.clone(),
        Box::new(block_store.clone()),
        Box::new(meta_store.clone()),
        Box::new(folder_store.clone()),
    )
    .unwrap();
    Harness {
        cache,
        clock,
        limiter,
        block_store,
        meta_store,
        folder_store,
    }
}

fn build_harness(max_bytes: u64, probe: Arc<dyn DiskProbe>) -> Harness {
    build_harness_on(
        max_bytes,
        probe,
        MemoryKvStore::new(),
        MemoryKvStore::new(),
        MemoryKvStore::new(),
    )
}

fn default_harness() -> Harness {
    build_harness(1 << 30, Arc::new(FixedDiskProbe::unlimited()))
}

/// Deterministic block fixture: id, payload, and key half derived from a
/// tag. Ids spread uniformly over the id space, which the randomized
/// eviction sampling relies on.
fn make_block(tag: u64) -> (BlockId, Vec<u8>, ServerKeyHalf) {
    let mut rng = StdRng::seed_from_u64(0xB10C_0000 ^ tag);
    let mut id = [0u8; 20];
    rng.fill_bytes(&mut id);
    let mut payload = vec![0u8; PAYLOAD_LEN];
    rng.fill_bytes(&mut payload);
    let mut half = [0u8; SERVER_KEY_HALF_LEN];
    rng.fill_bytes(&mut half);
    (BlockId::from_slice(&id), payload, ServerKeyHalf::new(half))
}

async fn put_block(harness: &Harness, ctx: &Context, folder: FolderId, tag: u64) -> BlockId {
    let (id, payload, half) = make_block(tag);
    harness
        .cache
        .put(ctx, folder, &id, &payload, half)
        .await
        .unwrap();
    id
}

/// Cross-check the three stores against each other and against the
/// in-memory counters.
fn assert_stores_consistent(harness: &Harness) {
    let codec = JsonCodec;
    let mut total_bytes = 0u64;
    let mut total_blocks = 0u64;
    let mut expected_index = BTreeSet::new();

    let mut iter = harness.meta_store.iter_from(&[]).unwrap();
    while let Some((key, value)) = iter.next_entry().unwrap() {
        let metadata: BlockMetadata = codec.decode(&value).unwrap();
        total_bytes += u64::from(metadata.block_size);
        total_blocks += 1;
        assert!(
            harness.block_store.get(&key).unwrap().is_some(),
            "metadata without payload"
        );
        let mut index_key = metadata.folder_id.as_bytes().to_vec();
        index_key.extend_from_slice(&key);
        expected_index.insert(index_key);
    }

    assert_eq!(harness.cache.num_bytes(), total_bytes, "byte counter drift");
    assert_eq!(harness.cache.num_blocks(), total_blocks, "block counter drift");

    let mut actual_index = BTreeSet::new();
    let mut iter = harness.folder_store.iter_from(&[]).unwrap();
    while let Some((key, _)) = iter.next_entry().unwrap() {
        actual_index.insert(key);
    }
    assert_eq!(actual_index, expected_index, "folder index drift");

    let mut payload_count = 0u64;
    let mut iter = harness.block_store.iter_from(&[]).unwrap();
    while iter.next_entry().unwrap().is_some() {
        payload_count += 1;
    }
    assert_eq!(payload_count, total_blocks, "orphan payloads");
}

/// Mean LRU age (relative to `origin`) of every cached block, read from
/// the metadata store.
fn mean_lru_seconds(harness: &Harness, origin: DateTime<Utc>) -> (f64, u64) {
    let codec = JsonCodec;
    let mut total_secs = 0f64;
    let mut count = 0u64;
    let mut iter = harness.meta_store.iter_from(&[]).unwrap();
    while let Some((_, value)) = iter.next_entry().unwrap() {
        let metadata: BlockMetadata = codec.decode(&value).unwrap();
        total_secs += (metadata.lru_time - origin).num_milliseconds() as f64 / 1000.0;
        count += 1;
    }
    if count == 0 {
        (0.0, 0)
    } else {
        (total_secs / count as f64, count)
    }
}

// ============================================================================
// Put / get / delete round trips
// ============================================================================

#[tokio::test]
async fn test_put_and_get_updates_lru() {
    let harness = default_harness();
    let ctx = Context::background();
    let folder = FolderId::fake(0);
    let (id, payload, half) = make_block(1);

    harness
        .cache
        .put(&ctx, folder, &id, &payload, half)
        .await
        .unwrap();
    let put_time = harness.cache.lru_time(&id).unwrap();
    harness.clock.advance(ChronoDuration::seconds(1));

    let (got_payload, got_half) = harness.cache.get(&ctx, folder, &id).await.unwrap();
    assert_eq!(&got_payload[..], &payload[..]);
    assert_eq!(got_half, half);

    let get_time = harness.cache.lru_time(&id).unwrap();
    assert!(get_time > put_time, "get must refresh the LRU time");

    assert_eq!(harness.cache.num_blocks(), 1);
    assert_eq!(harness.cache.num_bytes(), ENTRY_SIZE);
    assert_stores_consistent(&harness);
}

#[tokio::test]
async fn test_get_missing_block() {
    let harness = default_harness();
    let ctx = Context::background();
    let folder = FolderId::fake(0);
    put_block(&harness, &ctx, folder, 1).await;

    let (unknown, _, _) = make_block(999);
    let err = harness.cache.get(&ctx, folder, &unknown).await.unwrap_err();
    match err {
        CacheError::NoSuchBlock(id) => assert_eq!(id, unknown),
        other => panic!("expected NoSuchBlock, got {other:?}"),
    }
    assert!(matches!(
        harness.cache.lru_time(&unknown),
        Err(CacheError::NotFound)
    ));
}

#[tokio::test]
async fn test_delete_by_folder() {
    let harness = default_harness();
    let ctx = Context::background();

    // Seed a few other folders so deletion has neighbors to not touch.
    for tag in [0u8, 1, 2, 4, 5] {
        put_block(&harness, &ctx, FolderId::fake(tag), 100 + u64::from(tag)).await;
    }
    let folder = FolderId::fake(3);
    let block1 = put_block(&harness, &ctx, folder, 1).await;
    let block2 = put_block(&harness, &ctx, folder, 2).await;
    let block3 = put_block(&harness, &ctx, folder, 3).await;
    assert_eq!(harness.cache.num_blocks(), 8);

    let (removed, bytes_removed) = harness
        .cache
        .delete_by_folder(&ctx, folder, &[block1.clone(), block2.clone()])
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(bytes_removed, 2 * ENTRY_SIZE);

    assert!(matches!(
        harness.cache.get(&ctx, folder, &block1).await,
        Err(CacheError::NoSuchBlock(_))
    ));
    assert!(matches!(
        harness.cache.get(&ctx, folder, &block2).await,
        Err(CacheError::NoSuchBlock(_))
    ));
    harness.cache.get(&ctx, folder, &block3).await.unwrap();

    assert!(matches!(
        harness.cache.lru_time(&block1),
        Err(CacheError::NotFound)
    ));
    assert!(matches!(
        harness.cache.lru_time(&block2),
        Err(CacheError::NotFound)
    ));

    // Deleting ids that are already gone is not an error.
    let (removed, bytes_removed) = harness
        .cache
        .delete_by_folder(&ctx, folder, &[block1, block2])
        .await
        .unwrap();
    assert_eq!((removed, bytes_removed), (0, 0));

    assert_eq!(harness.cache.num_blocks(), 6);
    assert_eq!(
        harness.limiter.disk_cache_snapshot().used,
        harness.cache.num_bytes() as i64
    );
    assert_stores_consistent(&harness);
}

#[tokio::test]
async fn test_duplicate_put_refreshes_lru_and_conflicting_put_fails() {
    let harness = default_harness();
    let ctx = Context::background();
    let folder = FolderId::fake(0);
    let (id, payload, half) = make_block(1);

    harness
        .cache
        .put(&ctx, folder, &id, &payload, half)
        .await
        .unwrap();
    let first_time = harness.cache.lru_time(&id).unwrap();
    harness.clock.advance(ChronoDuration::seconds(2));

    // Same payload: allowed, counts stay put, LRU refreshes.
    harness
        .cache
        .put(&ctx, folder, &id, &payload, half)
        .await
        .unwrap();
    assert_eq!(harness.cache.num_blocks(), 1);
    assert!(harness.cache.lru_time(&id).unwrap() > first_time);

    // Different payload under the same id: refused.
    let conflicting = vec![0x5a; PAYLOAD_LEN];
    let err = harness
        .cache
        .put(&ctx, folder, &id, &conflicting, half)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::InconsistentBlock(_)), "got {err:?}");
    assert_eq!(harness.cache.num_blocks(), 1);
    assert_stores_consistent(&harness);
}

#[tokio::test]
async fn test_put_rejects_block_larger_than_cache() {
    let harness = build_harness(100, Arc::new(FixedDiskProbe::unlimited()));
    let ctx = Context::background();
    let (id, payload, half) = make_block(1); // entry is 96 bytes, fits
    harness
        .cache
        .put(&ctx, FolderId::fake(0), &id, &payload, half)
        .await
        .unwrap();

    let (big_id, _, big_half) = make_block(2);
    let oversized = vec![1u8; 128];
    let err = harness
        .cache
        .put(&ctx, FolderId::fake(0), &big_id, &oversized, big_half)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::OverCapacity(..)), "got {err:?}");
    assert_eq!(harness.cache.num_blocks(), 1);
}

// ============================================================================
// Ceiling-triggered eviction
// ============================================================================

/// Filling the cache to a static byte ceiling makes the next put evict a
/// batch before returning.
#[tokio::test]
async fn test_static_ceiling_triggers_eviction() {
    let num_folders = 5u8;
    let blocks_per_folder = 10u64;
    let total = u64::from(num_folders) * blocks_per_folder;
    let harness = build_harness(total * ENTRY_SIZE, Arc::new(FixedDiskProbe::unlimited()));
    let ctx = Context::background();

    let mut tag = 0u64;
    for folder_tag in 0..num_folders {
        for _ in 0..blocks_per_folder {
            put_block(&harness, &ctx, FolderId::fake(folder_tag), tag).await;
            harness.clock.advance(ChronoDuration::seconds(1));
            tag += 1;
        }
    }
    assert_eq!(harness.cache.num_blocks(), total);
    assert_eq!(harness.cache.num_bytes(), total * ENTRY_SIZE);

    // One more put goes over the ceiling and costs an eviction pass. It
    // lands in an already-full folder, so whichever folder the sampler
    // picks holds at least a full batch.
    put_block(&harness, &ctx, FolderId::fake(0), tag).await;
    assert_eq!(
        harness.cache.num_blocks(),
        total + 1 - DEFAULT_EVICT_COUNT as u64
    );
    assert!(harness.cache.num_bytes() < total * ENTRY_SIZE);
    assert_eq!(
        harness.limiter.disk_cache_snapshot().used,
        harness.cache.num_bytes() as i64
    );
    assert_stores_consistent(&harness);
}

/// Probe that lets tests shrink the reported disk at will.
struct AdjustableProbe {
    free_bytes: AtomicI64,
    free_files: AtomicI64,
}

impl AdjustableProbe {
    fn unlimited() -> Self {
        Self {
            free_bytes: AtomicI64::new(i64::MAX),
            free_files: AtomicI64::new(i64::MAX),
        }
    }

    fn set_free_bytes(&self, free: i64) {
        self.free_bytes.store(free, Ordering::SeqCst);
    }
}

impl DiskProbe for AdjustableProbe {
    fn free_bytes_and_files(&self) -> std::io::Result<(i64, i64)> {
        Ok((
            self.free_bytes.load(Ordering::SeqCst),
            self.free_files.load(Ordering::SeqCst),
        ))
    }
}

/// When the disk probe reports a shrunken disk, the limiter's dynamic
/// ceiling pushes the cache into periodic eviction while puts keep
/// landing.
#[tokio::test]
async fn test_dynamic_ceiling_evicts_as_probe_shrinks() {
    let probe = Arc::new(AdjustableProbe::unlimited());
    let harness = build_harness(1 << 30, probe.clone());
    let ctx = Context::background();

    let mut tag = 0u64;
    for folder_tag in 0..5u8 {
        for _ in 0..10u64 {
            put_block(&harness, &ctx, FolderId::fake(folder_tag), tag).await;
            harness.clock.advance(ChronoDuration::seconds(1));
            tag += 1;
        }
    }
    let seeded_bytes = harness.cache.num_bytes();
    assert_eq!(seeded_bytes, 50 * ENTRY_SIZE);

    // Report free space at three times current usage. With the cache
    // allowed a quarter of (used + free), its dynamic share is exactly
    // what it holds now, so continued growth forces eviction.
    probe.set_free_bytes(seeded_bytes as i64 * 3);

    for _ in 0..50 {
        put_block(&harness, &ctx, FolderId::fake(10), tag).await;
        harness.clock.advance(ChronoDuration::seconds(1));
        tag += 1;
        assert!(
            harness.cache.num_bytes() <= seeded_bytes,
            "cache grew past its dynamic share: {} > {seeded_bytes}",
            harness.cache.num_bytes()
        );
    }

    let evicted = 100 - harness.cache.num_blocks();
    assert!(
        (30..=70).contains(&evicted),
        "expected periodic eviction, evicted {evicted} of 100"
    );
    assert_eq!(
        harness.limiter.disk_cache_snapshot().used,
        harness.cache.num_bytes() as i64
    );
    assert_stores_consistent(&harness);
}

// ============================================================================
// Probabilistic LRU quality
// ============================================================================

/// Repeated cache-wide evictions must raise the mean LRU age of the
/// surviving blocks: the sampler keeps finding and removing old blocks.
/// Seeded at one put per second, the per-round improvement has to beat
/// three ticks on average.
#[tokio::test]
async fn test_eviction_raises_mean_lru_cache_wide() {
    let harness = default_harness();
    let ctx = Context::background();
    let origin = harness.clock.now();

    let total = 100u64;
    let folder = FolderId::fake(1);
    for tag in 0..total {
        put_block(&harness, &ctx, folder, tag).await;
        harness.clock.advance(ChronoDuration::seconds(1));
    }

    // Seeded uniformly, the average age starts at about half the total.
    let mut previous_mean = (total / 2) as f64;
    let mut mean_delta_sum = 0.0;
    let mut rounds_with_survivors = 0;
    let mut remaining = total;

    while remaining > 0 {
        let (removed, _) = harness.cache.evict(&ctx, DEFAULT_EVICT_COUNT).await.unwrap();
        assert!(removed > 0, "eviction made no progress");
        remaining -= removed as u64;

        let (mean, count) = mean_lru_seconds(&harness, origin);
        assert_eq!(count, remaining, "eviction removed {removed} blocks");
        assert_eq!(harness.cache.num_blocks(), remaining);
        if remaining > 0 {
            mean_delta_sum += mean - previous_mean;
            previous_mean = mean;
            rounds_with_survivors += 1;
        }
    }

    let average_delta = mean_delta_sum / rounds_with_survivors as f64;
    assert!(
        average_delta > 3.0,
        "mean LRU age should climb by over 3s per round, got {average_delta:.2}s"
    );
    assert_stores_consistent(&harness);
}

/// Same property for single-folder eviction, with bystander folders left
/// alone.
#[tokio::test]
async fn test_eviction_raises_mean_lru_within_folder() {
    let harness = default_harness();
    let ctx = Context::background();
    let origin = harness.clock.now();

    for tag in [0u8, 1, 2, 4, 5] {
        put_block(&harness, &ctx, FolderId::fake(tag), 200 + u64::from(tag)).await;
        harness.clock.advance(ChronoDuration::seconds(1));
    }
    let folder = FolderId::fake(3);
    let folder_blocks = 100u64;
    let mut ids = Vec::new();
    for tag in 0..folder_blocks {
        ids.push(put_block(&harness, &ctx, folder, tag).await);
        harness.clock.advance(ChronoDuration::seconds(1));
    }

    let folder_mean = |surviving: &[BlockId]| -> f64 {
        let mut total = 0.0;
        for id in surviving {
            let lru = harness.cache.lru_time(id).unwrap();
            total += (lru - origin).num_milliseconds() as f64 / 1000.0;
        }
        total / surviving.len() as f64
    };

    let mut surviving = ids;
    let mut previous_mean = 50.0;
    let mut mean_delta_sum = 0.0;
    let mut rounds_with_survivors = 0;

    while !surviving.is_empty() {
        let before = surviving.len();
        let (removed, _) = harness
            .cache
            .evict_from_folder(&ctx, folder, DEFAULT_EVICT_COUNT)
            .await
            .unwrap();
        assert!(removed > 0, "eviction made no progress");
        surviving.retain(|id| harness.cache.lru_time(id).is_ok());
        assert_eq!(surviving.len(), before - removed);
        assert_eq!(harness.cache.num_blocks() as usize, surviving.len() + 5);

        if !surviving.is_empty() {
            let mean = folder_mean(&surviving);
            mean_delta_sum += mean - previous_mean;
            previous_mean = mean;
            rounds_with_survivors += 1;
        }
    }

    let average_delta = mean_delta_sum / rounds_with_survivors as f64;
    assert!(
        average_delta > 3.0,
        "mean LRU age should climb by over 3s per round, got {average_delta:.2}s"
    );

    // The bystander folders were never touched.
    assert_eq!(harness.cache.num_blocks(), 5);
    assert_stores_consistent(&harness);
}

// ============================================================================
// Corruption, startup, shutdown, cancellation
// ============================================================================

#[tokio::test]
async fn test_metadata_missing_for_payload_is_corruption() {
    let harness = default_harness();
    let ctx = Context::background();
    let folder = FolderId::fake(0);
    let id = put_block(&harness, &ctx, folder, 1).await;

    // Sabotage: drop the metadata record out from under the payload.
    harness.meta_store.delete(id.as_bytes()).unwrap();

    let err = harness.cache.get(&ctx, folder, &id).await.unwrap_err();
    assert!(matches!(err, CacheError::Corrupted { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_startup_scan_rebuilds_counters_and_cleans_torn_writes() {
    let codec = JsonCodec;
    let block_store = MemoryKvStore::new();
    let meta_store = MemoryKvStore::new();
    let folder_store = MemoryKvStore::new();

    // A complete, healthy entry.
    let folder = FolderId::fake(1);
    let (good_id, good_payload, good_half) = make_block(1);
    let mut good_entry = good_payload.clone();
    good_entry.extend_from_slice(good_half.as_bytes());
    block_store.put(good_id.as_bytes(), &good_entry).unwrap();
    let metadata = BlockMetadata {
        folder_id: folder,
        lru_time: DateTime::UNIX_EPOCH,
        block_size: good_entry.len() as u32,
    };
    meta_store
        .put(good_id.as_bytes(), &codec.encode(&metadata).unwrap())
        .unwrap();
    let mut index_key = folder.as_bytes().to_vec();
    index_key.extend_from_slice(good_id.as_bytes());
    folder_store.put(&index_key, &[]).unwrap();

    // A payload whose metadata never landed (crash between writes).
    let (orphan_id, orphan_payload, orphan_half) = make_block(2);
    let mut orphan_entry = orphan_payload.clone();
    orphan_entry.extend_from_slice(orphan_half.as_bytes());
    block_store.put(orphan_id.as_bytes(), &orphan_entry).unwrap();

    // An index entry whose metadata is gone (crash mid-delete).
    let (stale_id, _, _) = make_block(3);
    let mut stale_key = FolderId::fake(2).as_bytes().to_vec();
    stale_key.extend_from_slice(stale_id.as_bytes());
    folder_store.put(&stale_key, &[]).unwrap();

    let harness = build_harness_on(
        1 << 30,
        Arc::new(FixedDiskProbe::unlimited()),
        block_store,
        meta_store,
        folder_store,
    );

    assert_eq!(harness.cache.num_blocks(), 1);
    assert_eq!(harness.cache.num_bytes(), ENTRY_SIZE);
    assert!(harness.block_store.get(orphan_id.as_bytes()).unwrap().is_none());
    assert!(harness.folder_store.get(&stale_key).unwrap().is_none());
    // The surviving bytes were reported to the limiter.
    assert_eq!(
        harness.limiter.disk_cache_snapshot().used,
        ENTRY_SIZE as i64
    );
    assert_stores_consistent(&harness);

    // The healthy entry is still fully readable.
    let ctx = Context::background();
    let (payload, half) = harness.cache.get(&ctx, folder, &good_id).await.unwrap();
    assert_eq!(&payload[..], &good_payload[..]);
    assert_eq!(half, good_half);
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_final() {
    let harness = default_harness();
    let ctx = Context::background();
    let folder = FolderId::fake(0);
    let id = put_block(&harness, &ctx, folder, 1).await;

    harness.cache.shutdown(&ctx).await;
    harness.cache.shutdown(&ctx).await;

    assert!(matches!(
        harness.cache.get(&ctx, folder, &id).await,
        Err(CacheError::ShutDown)
    ));
    assert!(matches!(
        harness.cache.put(&ctx, folder, &id, &[1], ServerKeyHalf::default()).await,
        Err(CacheError::ShutDown)
    ));
    assert!(matches!(
        harness.cache.lru_time(&id),
        Err(CacheError::ShutDown)
    ));
    // The stores were closed for real.
    assert!(matches!(
        harness.block_store.get(id.as_bytes()),
        Err(EngineError::Closed)
    ));
}

#[tokio::test]
async fn test_cancelled_context_fails_cache_reads() {
    let harness = default_harness();
    let ctx = Context::background();
    let folder = FolderId::fake(0);
    let id = put_block(&harness, &ctx, folder, 1).await;

    let cancelled = Context::background();
    cancelled.cancel();
    let err = harness.cache.get(&cancelled, folder, &id).await.unwrap_err();
    assert!(
        matches!(err, CacheError::Limiter(LimiterError::Cancelled)),
        "got {err:?}"
    );
    let err = harness
        .cache
        .delete_by_folder(&cancelled, folder, &[id])
        .await
        .unwrap_err();
    assert!(
        matches!(err, CacheError::Limiter(LimiterError::Cancelled)),
        "got {err:?}"
    );
    assert_eq!(harness.cache.num_blocks(), 1);
}
