use std::sync::Arc;
use std::thread;

use geostream::buffer::{BackendKind, HostStorageProvider, RingConfig};
use geostream::fence::Timeline;
use geostream::{
    BufferKey, BufferManager, BufferSpec, DeviceBindingCache, FenceContext, LockMode,
};

fn manager() -> BufferManager {
    BufferManager::new(
        Box::new(HostStorageProvider::default()),
        FenceContext::without_sub_passes(Arc::new(Timeline::new())),
    )
}

fn read_back(manager: &mut BufferManager, elements: usize, key: BufferKey) -> Vec<u8> {
    let region = manager.buffer_mut(key).unwrap();
    region.lock(elements, LockMode::ReadOnly).unwrap();
    let bytes = region.locked_bytes().unwrap().to_vec();
    region.unlock(0);
    bytes
}

#[test]
fn staged_writes_land_byte_identical() {
    for backend in [BackendKind::Delegated, BackendKind::SelfManaged] {
        let mut manager = manager();
        let mut cache = DeviceBindingCache::new();
        let key = manager.create_buffer(
            BufferSpec::vertices(8, 64)
                .backend(backend)
                .ring(RingConfig::default().assert_on_misuse(false))
                .debug_name("round trip"),
        );

        assert_eq!(manager.buffer(key).unwrap().ring().backend_kind(), backend);
        manager
            .write(key, &[1u64, 2, 3], LockMode::Append, &mut cache)
            .unwrap();

        let staged = thread::scope(|s| {
            s.spawn(|| {
                let region = manager.buffer_mut(key).unwrap();
                let first = region.write(&[10u64, 11], LockMode::Append).unwrap();
                let second = region.write(&[12u64], LockMode::Append).unwrap();
                (first, second)
            })
            .join()
            .unwrap()
        });

        assert!(staged.0.staged && staged.1.staged);
        assert_eq!(staged.0.element_offset, 3);
        assert_eq!(staged.1.element_offset, 5);
        assert!(manager.buffer(key).unwrap().has_staged_data());
        assert_eq!(manager.buffer(key).unwrap().ring().write_cursor(), 24);

        manager.handle_late_creation().unwrap();

        let region = manager.buffer(key).unwrap();
        assert!(!region.has_staged_data());
        assert_eq!(region.ring().write_cursor(), 48);
        assert_eq!(region.stats().staged_locks, 2);
        assert_eq!(region.stats().late_creations, 1);

        let expected: Vec<u8> = bytemuck::cast_slice(&[1u64, 2, 3, 10, 11, 12]).to_vec();
        assert_eq!(read_back(&mut manager, 6, key), expected);
    }
}

#[test]
fn staged_discard_replaces_everything() {
    let mut manager = manager();
    let mut cache = DeviceBindingCache::new();
    let key = manager.create_buffer(
        BufferSpec::indices(4, 16).ring(RingConfig::default().assert_on_misuse(false)),
    );
    manager
        .write(key, &[7u32; 12], LockMode::Append, &mut cache)
        .unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            let region = manager.buffer_mut(key).unwrap();
            let result = region.write(&[1u32, 2, 3, 4, 5, 6], LockMode::Append).unwrap();
            assert!(result.discarded);
            assert_eq!(result.element_offset, 0);
        });
    });

    manager.handle_late_creation().unwrap();
    assert_eq!(manager.buffer(key).unwrap().ring().write_cursor(), 24);
    assert_eq!(manager.buffer(key).unwrap().stats().discards, 1);

    let expected: Vec<u8> = bytemuck::cast_slice(&[1u32, 2, 3, 4, 5, 6]).to_vec();
    assert_eq!(read_back(&mut manager, 6, key), expected);
}

#[test]
fn owner_lock_replays_staging_first() {
    let mut manager = manager();
    let mut cache = DeviceBindingCache::new();
    let key = manager.create_buffer(BufferSpec::vertices(4, 32));

    thread::scope(|s| {
        s.spawn(|| {
            manager
                .buffer_mut(key)
                .unwrap()
                .write(&[5u32, 6], LockMode::Append)
                .unwrap();
        });
    });

    let result = manager.write(key, &[7u32], LockMode::Append, &mut cache).unwrap();
    assert!(!result.staged);
    assert_eq!(result.element_offset, 2);

    let expected: Vec<u8> = bytemuck::cast_slice(&[5u32, 6, 7]).to_vec();
    assert_eq!(read_back(&mut manager, 3, key), expected);
}

#[test]
fn late_creation_off_the_owner_thread_is_refused() {
    let mut manager = manager();
    thread::scope(|s| {
        s.spawn(|| assert!(manager.handle_late_creation().is_err()));
    });
    assert!(manager.handle_late_creation().is_ok());
}
