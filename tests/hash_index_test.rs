use std::sync::Arc;
use std::thread;

use anyhow::Result;

use basaltdb::storage::buffer::BufferPool;
use basaltdb::ExtendibleHashIndex;

mod common;
use common::create_test_buffer_pool;

fn create_index(pool_size: usize) -> Result<(ExtendibleHashIndex<u32, u32>, tempfile::NamedTempFile)> {
    let (pool, temp_file) = create_test_buffer_pool(pool_size)?;
    let buffer_pool: Arc<dyn BufferPool> = pool;
    let index = ExtendibleHashIndex::new(buffer_pool)?;
    Ok((index, temp_file))
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (index, _temp_file) = create_index(16)?;

    for i in 0..5u32 {
        assert!(index.insert(&i, &i)?);
        assert_eq!(index.get(&i)?, vec![i]);
    }
    index.verify_integrity()?;

    // A second value under the same key is fine; the same pair is not
    for i in 0..5u32 {
        if i == 0 {
            assert!(!index.insert(&i, &(2 * i))?, "duplicate pair must be rejected");
        } else {
            assert!(index.insert(&i, &(2 * i))?);
        }
    }

    for i in 1..5u32 {
        let mut values = index.get(&i)?;
        values.sort_unstable();
        assert_eq!(values, vec![i, 2 * i]);
    }

    // Missing key
    assert!(index.get(&20)?.is_empty());
    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_remove() -> Result<()> {
    let (index, _temp_file) = create_index(16)?;

    for i in 0..5u32 {
        index.insert(&i, &i)?;
        index.insert(&i, &(i + 100))?;
    }

    for i in 0..5u32 {
        assert!(index.remove(&i, &i)?);
        assert!(!index.remove(&i, &i)?, "second remove of a pair is a no-op");
        assert_eq!(index.get(&i)?, vec![i + 100]);
    }

    // Removing a pair that never existed
    assert!(!index.remove(&77, &77)?);
    index.verify_integrity()?;
    Ok(())
}

// Scenario S2: filling one bucket past capacity forces the first split
#[test]
fn test_split_on_full_bucket() -> Result<()> {
    let (index, _temp_file) = create_index(16)?;
    let capacity = ExtendibleHashIndex::<u32, u32>::bucket_capacity() as u32;

    assert_eq!(index.global_depth()?, 0);
    for key in 0..=capacity {
        assert!(index.insert(&key, &key)?);
    }

    assert_eq!(index.global_depth()?, 1);
    assert_eq!(index.local_depth(0)?, 1);
    assert_eq!(index.local_depth(1)?, 1);
    index.verify_integrity()?;

    for key in 0..=capacity {
        assert_eq!(index.get(&key)?, vec![key], "key {} lost across the split", key);
    }
    Ok(())
}

// Scenario S3: emptying one of the two buckets merges it back and the
// directory shrinks to a single entry
#[test]
fn test_merge_after_emptying_bucket() -> Result<()> {
    let (index, _temp_file) = create_index(16)?;
    let capacity = ExtendibleHashIndex::<u32, u32>::bucket_capacity() as u32;

    for key in 0..=capacity {
        index.insert(&key, &key)?;
    }
    assert_eq!(index.global_depth()?, 1);

    // Remove every key the directory routes to slot 1
    let right_keys: Vec<u32> = (0..=capacity)
        .filter(|key| index.directory_index(key).unwrap() == 1)
        .collect();
    assert!(!right_keys.is_empty());
    for key in &right_keys {
        assert!(index.remove(key, key)?);
    }

    assert_eq!(index.global_depth()?, 0);
    assert_eq!(index.local_depth(0)?, 0);
    index.verify_integrity()?;

    // Keys in the surviving bucket are untouched
    for key in 0..=capacity {
        if right_keys.contains(&key) {
            assert!(index.get(&key)?.is_empty());
        } else {
            assert_eq!(index.get(&key)?, vec![key]);
        }
    }
    Ok(())
}

#[test]
fn test_grows_through_many_splits() -> Result<()> {
    let (index, _temp_file) = create_index(64)?;
    let capacity = ExtendibleHashIndex::<u32, u32>::bucket_capacity() as u32;
    let count = capacity * 3;

    for key in 0..count {
        assert!(index.insert(&key, &key)?, "insert of key {} failed", key);
    }
    assert!(index.global_depth()? >= 2);
    index.verify_integrity()?;

    for key in 0..count {
        assert_eq!(index.get(&key)?, vec![key]);
    }

    for key in 0..count {
        assert!(index.remove(&key, &key)?);
    }
    for key in 0..count {
        assert!(index.get(&key)?.is_empty());
    }
    index.verify_integrity()?;
    Ok(())
}

#[test]
fn test_concurrent_inserts() -> Result<()> {
    let (pool, _temp_file) = create_test_buffer_pool(64)?;
    let buffer_pool: Arc<dyn BufferPool> = pool;
    let index = Arc::new(ExtendibleHashIndex::<u32, u32>::new(buffer_pool)?);

    let per_thread = 500u32;
    let mut handles = Vec::new();
    for t in 0..4u32 {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            let start = t * per_thread;
            for key in start..start + per_thread {
                index.insert(&key, &key).expect("insert failed");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    index.verify_integrity()?;
    for key in 0..4 * per_thread {
        assert_eq!(index.get(&key)?, vec![key], "key {} missing after concurrent load", key);
    }
    Ok(())
}
