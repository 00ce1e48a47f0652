use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

extern crate cariboudb;
use cariboudb::buffer::BufferPoolManager;
use cariboudb::indexes::{ExtendibleHashTable, Transaction, XxHasher};
use cariboudb::pages::{Key, PageId, RecordId, SlotId};
use cariboudb::storage::FileStorage;

use std::sync::Arc;
use std::thread;

use tempfile::NamedTempFile;

const POOL_SIZE: usize = 64;

fn make_record(key: Key) -> RecordId {
    RecordId::new(PageId::new(key), SlotId::new(key as u16))
}

fn hash_mixed_benchmark_call(num_read_threads: usize) {
    let storage_path = NamedTempFile::new().unwrap();
    let storage = Arc::new(FileStorage::create(storage_path.path()).unwrap());
    let pool = Arc::new(BufferPoolManager::new(POOL_SIZE, storage));
    let table =
        Arc::new(ExtendibleHashTable::try_with_hasher(pool, XxHasher::default()).unwrap());

    let start_key = 0;
    let end_key = 16000;

    let mut threads = Vec::new();
    for thread_id in 0..num_read_threads {
        let table = Arc::clone(&table);
        threads.push(thread::spawn(move || {
            let txn = Transaction::new(thread_id as u64);
            for key in start_key..end_key {
                let _ = table.get_value(&txn, key);
            }
        }));
    }

    let table_clone = Arc::clone(&table);
    threads.push(thread::spawn(move || {
        let txn = Transaction::new(u64::MAX);
        for key in start_key..end_key {
            let _ = table_clone.insert(&txn, key, make_record(key));
        }
    }));

    for thread in threads {
        thread.join().unwrap();
    }
}

fn hash_write_benchmark_call(num_threads: usize) {
    let storage_path = NamedTempFile::new().unwrap();
    let storage = Arc::new(FileStorage::create(storage_path.path()).unwrap());
    let pool = Arc::new(BufferPoolManager::new(POOL_SIZE, storage));
    let table =
        Arc::new(ExtendibleHashTable::try_with_hasher(pool, XxHasher::default()).unwrap());

    let keys_per_thread: Key = 4000;
    let mut threads = Vec::new();
    for thread_id in 0..num_threads {
        let table = Arc::clone(&table);
        threads.push(thread::spawn(move || {
            let txn = Transaction::new(thread_id as u64);
            let base = thread_id as Key * keys_per_thread;
            for key in base..base + keys_per_thread {
                let _ = table.insert(&txn, key, make_record(key));
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
}

fn hash_contention_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash mixed contention benchmark");
    group.sample_size(10);
    group.bench_function("9 readers , 1 writer", |b| {
        b.iter(|| hash_mixed_benchmark_call(black_box(9)));
    });
    group.finish();

    let mut group = c.benchmark_group("hash insert contention benchmark");
    group.sample_size(10);
    group.bench_function("8 threads", |b| {
        b.iter(|| hash_write_benchmark_call(black_box(8)));
    });
    group.bench_function("16 threads", |b| {
        b.iter(|| hash_write_benchmark_call(black_box(16)));
    });
    group.finish();
}

criterion_group!(benches, hash_contention_benchmark);
criterion_main!(benches);
