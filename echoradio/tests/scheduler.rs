mod common;

use common::{FixedSource, touch};
use echoradio::{
    DirectoryTrackSource, Error, SchedulerConfig, Track, TrackCatalog, TrackScheduler, TrackSource,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn scheduler(source: impl TrackSource + 'static, config: SchedulerConfig, seed: u64) -> TrackScheduler {
    let catalog = TrackCatalog::new("/music", Arc::new(source));
    let mut scheduler = TrackScheduler::with_rng(catalog, config, StdRng::seed_from_u64(seed));
    scheduler.load();
    scheduler
}

#[test]
fn test_thousand_draws_without_albums_are_uniform() {
    let mut scheduler = scheduler(FixedSource::new(3, 0), SchedulerConfig::default(), 2024);

    let mut counts: HashMap<Track, usize> = HashMap::new();
    for _ in 0..1000 {
        let track = scheduler.next().unwrap();
        assert!(!track.is_album_track());
        *counts.entry(track).or_default() += 1;
    }

    assert_eq!(counts.len(), 3);
    for (track, count) in counts {
        // attendu ≈ 333
        assert!(
            (250..=420).contains(&count),
            "{} drawn {} times",
            track,
            count
        );
    }
}

#[test]
fn test_draws_come_only_from_non_empty_pools() {
    for (general, album) in [(1, 0), (0, 1), (4, 2), (1, 5)] {
        for chance in [0.0, 0.1, 0.5, 1.0] {
            let config = SchedulerConfig {
                album_chance: chance,
                ..Default::default()
            };
            let mut scheduler = scheduler(FixedSource::new(general, album), config, 7);

            for _ in 0..200 {
                let track = scheduler.next().unwrap();
                if track.is_album_track() {
                    assert!(album > 0);
                    assert!(scheduler.catalog().album().contains(&track));
                    if general > 0 {
                        assert!(chance > 0.0, "album track drawn with zero chance");
                    }
                } else {
                    assert!(general > 0);
                    assert!(scheduler.catalog().general().contains(&track));
                    if album > 0 {
                        assert!(chance < 1.0, "general track drawn with certain album chance");
                    }
                }
            }
        }
    }
}

#[test]
fn test_album_share_follows_chance() {
    let config = SchedulerConfig {
        album_chance: 0.1,
        ..Default::default()
    };
    let mut scheduler = scheduler(FixedSource::new(10, 10), config, 99);

    let albums = (0..5000)
        .filter(|_| scheduler.next().unwrap().is_album_track())
        .count();
    // attendu ≈ 500
    assert!((350..=650).contains(&albums), "{} album draws", albums);
}

#[test]
fn test_empty_directory_gives_catalog_empty() {
    let dir = TempDir::new().unwrap();
    let catalog = TrackCatalog::new(dir.path(), Arc::new(DirectoryTrackSource::default()));
    let mut scheduler = TrackScheduler::with_rng(
        catalog,
        SchedulerConfig {
            max_reload_attempts: 2,
            ..Default::default()
        },
        StdRng::seed_from_u64(1),
    );

    match scheduler.next() {
        Err(Error::CatalogEmpty { root, attempts }) => {
            assert_eq!(root, dir.path());
            assert_eq!(attempts, 2);
        }
        other => panic!("expected CatalogEmpty, got {:?}", other),
    }
}

#[test]
fn test_reload_picks_up_new_files() {
    let dir = TempDir::new().unwrap();
    let catalog = TrackCatalog::new(dir.path(), Arc::new(DirectoryTrackSource::default()));
    let mut scheduler =
        TrackScheduler::with_rng(catalog, SchedulerConfig::default(), StdRng::seed_from_u64(1));
    scheduler.load();
    assert!(scheduler.catalog().is_empty());

    touch(&dir.path().join("late.mp3"));

    let track = scheduler.next().unwrap();
    assert_eq!(track.path(), dir.path().join("late.mp3"));
}

/// Empty on the first discoveries, then one track
struct EventuallyFilled {
    empty_calls: usize,
    calls: AtomicUsize,
}

impl TrackSource for EventuallyFilled {
    fn discover(&self, _root: &Path) -> (Vec<Track>, Vec<Track>) {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.empty_calls {
            (Vec::new(), Vec::new())
        } else {
            (vec![Track::general("/music/finally.mp3")], Vec::new())
        }
    }
}

#[test]
fn test_reload_attempts_are_bounded() {
    // chargement initial + 3 rechargements vides : échec
    let source = EventuallyFilled {
        empty_calls: 4,
        calls: AtomicUsize::new(0),
    };
    let mut failing = scheduler(source, SchedulerConfig::default(), 3);
    assert!(matches!(
        failing.next(),
        Err(Error::CatalogEmpty { attempts: 3, .. })
    ));

    // chargement initial + 2 rechargements vides : la troisième tentative réussit
    let source = EventuallyFilled {
        empty_calls: 3,
        calls: AtomicUsize::new(0),
    };
    let mut recovering = scheduler(source, SchedulerConfig::default(), 3);
    assert_eq!(
        recovering.next().unwrap().path(),
        Path::new("/music/finally.mp3")
    );
}

#[test]
fn test_reshuffle_preserves_pools() {
    let source = FixedSource::new(12, 4);
    let mut scheduler = scheduler(source.clone(), SchedulerConfig::default(), 5);

    let mut general_before = scheduler.catalog().general().to_vec();
    let mut album_before = scheduler.catalog().album().to_vec();
    let last_shuffle = scheduler.catalog().last_shuffle();

    scheduler.catalog_mut().reshuffle();

    let mut general_after = scheduler.catalog().general().to_vec();
    let mut album_after = scheduler.catalog().album().to_vec();
    for pool in [
        &mut general_before,
        &mut album_before,
        &mut general_after,
        &mut album_after,
    ] {
        pool.sort_by(|a, b| a.path().cmp(b.path()));
    }

    assert_eq!(general_before, general_after);
    assert_eq!(album_before, album_after);
    assert!(scheduler.catalog().last_shuffle() >= last_shuffle);
    assert_eq!(source.calls(), 1);
}
