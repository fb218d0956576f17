mod identity_map {
    use std::any::{type_name, TypeId};
    use std::collections::BTreeSet;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use tokio::sync::Barrier as AsyncBarrier;

    use crate::identity_map::Iter;
    use crate::{Guard, IdentityMap, ProportionalPolicy, ResizeContext, ResizePolicy};

    static_assertions::assert_impl_all!(IdentityMap<Arc<String>, String>: Send, Sync);
    static_assertions::assert_impl_all!(IdentityMap<TypeId, Arc<String>, ProportionalPolicy>: Send, Sync);
    static_assertions::assert_not_impl_any!(IdentityMap<Rc<String>, String>: Send, Sync);
    static_assertions::assert_not_impl_any!(IdentityMap<Arc<String>, Rc<String>>: Send, Sync);
    static_assertions::assert_not_impl_any!(Iter<'static, Arc<String>, String>: Send, Sync);

    struct R(&'static AtomicUsize);
    impl R {
        fn new(cnt: &'static AtomicUsize) -> R {
            cnt.fetch_add(1, Relaxed);
            R(cnt)
        }
    }
    impl Clone for R {
        fn clone(&self) -> Self {
            self.0.fetch_add(1, Relaxed);
            R(self.0)
        }
    }
    impl Drop for R {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Relaxed);
        }
    }

    /// Never grows the table.
    struct FixedPolicy(usize);
    impl ResizePolicy for FixedPolicy {
        fn initial_capacity(&self) -> usize {
            self.0
        }
        fn requested_capacity(&self, context: &ResizeContext) -> usize {
            context.width
        }
    }

    /// Records every context, and doubles the table once a chain reaches three entries.
    #[derive(Default)]
    struct RecordingPolicy(Mutex<Vec<ResizeContext>>);
    impl ResizePolicy for RecordingPolicy {
        fn initial_capacity(&self) -> usize {
            2
        }
        fn requested_capacity(&self, context: &ResizeContext) -> usize {
            self.0.lock().unwrap().push(*context);
            if context.max_depth >= 3 {
                context.width * 2
            } else {
                context.width
            }
        }
    }

    fn keys(workload_size: usize) -> Vec<Arc<usize>> {
        (0..workload_size).map(Arc::new).collect()
    }

    #[test]
    fn grow_to_next_power_of_two() {
        let map: IdentityMap<Arc<usize>, usize> = IdentityMap::with_growth(4, 2.0);
        assert_eq!(map.capacity(), 4);
        for key in keys(5) {
            assert_eq!(map.get_or_insert(key.clone(), *key), *key);
        }
        assert_eq!(map.capacity(), 8);
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn first_value_wins() {
        let map: IdentityMap<Arc<usize>, &str> = IdentityMap::default();
        let key = Arc::new(0);
        assert_eq!(map.get_or_insert(key.clone(), "v1"), "v1");
        assert_eq!(map.get_or_insert(key.clone(), "v2"), "v1");
        assert_eq!(map.get_or_insert_with(key.clone(), |_| "v3"), "v1");
        assert_eq!(map.get(&key), Some("v1"));
        assert_eq!(map.len(), 1);

        // Structurally equal but distinct.
        let other = Arc::new(0);
        assert!(!map.contains(&other));
        assert_eq!(map.get_or_insert(other, "v4"), "v4");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn clear() {
        let map: IdentityMap<Arc<usize>, usize> = IdentityMap::with_growth(4, 2.0);
        let keys = keys(64);
        for key in &keys {
            map.get_or_insert(key.clone(), **key);
        }
        assert!(map.capacity() >= 64);
        assert!(map.depth() >= 1);

        for _ in 0..2 {
            map.clear();
            assert_eq!(map.len(), 0);
            assert_eq!(map.depth(), 0);
            assert!(map.is_empty());
            assert_eq!(map.capacity(), 4);
            assert!(keys.iter().all(|key| !map.contains(key)));
            assert_eq!(map.iter(&Guard::new()).count(), 0);
        }

        assert_eq!(map.get_or_insert(keys[0].clone(), 17), 17);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn iter_survives_clear() {
        let map: IdentityMap<Arc<usize>, usize> = IdentityMap::with_growth(4, 2.0);
        let keys = keys(32);
        for key in &keys {
            map.get_or_insert(key.clone(), **key);
        }

        let guard = Guard::new();
        let value_ref = map.peek(&keys[7], &guard).unwrap();
        let mut iter = map.iter(&guard);
        let restart = iter.clone();
        assert!(iter.next().is_some());

        map.clear();
        assert_eq!(map.len(), 0);
        assert!(map.peek(&keys[7], &guard).is_none());

        assert_eq!(*value_ref, 7);
        assert_eq!(iter.count(), 31);
        let mut visited: Vec<usize> = restart.map(|(_, v)| *v).collect();
        visited.sort_unstable();
        assert_eq!(visited, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn insert_drop() {
        static INST_CNT: AtomicUsize = AtomicUsize::new(0);

        let map: IdentityMap<Arc<usize>, R> = IdentityMap::with_growth(2, 2.0);
        let workload_size = 256;
        for key in keys(workload_size) {
            drop(map.get_or_insert_with(key, |_| R::new(&INST_CNT)));
        }
        assert_eq!(INST_CNT.load(Relaxed), workload_size);
        assert_eq!(map.len(), workload_size);

        drop(map);
        while INST_CNT.load(Relaxed) != 0 {
            Guard::new().accelerate();
            thread::yield_now();
        }
    }

    #[test]
    fn factory_race() {
        let map: Arc<IdentityMap<TypeId, Arc<String>>> = Arc::new(IdentityMap::default());
        let num_calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));
        let threads: Vec<_> = (0..2)
            .map(|_| {
                let map = map.clone();
                let num_calls = num_calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    map.get_or_insert_with(TypeId::of::<u64>(), |_| {
                        num_calls.fetch_add(1, Relaxed);
                        thread::sleep(Duration::from_millis(50));
                        Arc::new(String::from("u64"))
                    })
                })
            })
            .collect();
        let results: Vec<Arc<String>> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert!(Arc::ptr_eq(&results[0], &results[1]));
        assert_eq!(num_calls.load(Relaxed), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn recursive_factory() {
        let map: IdentityMap<Arc<str>, usize> = IdentityMap::with_growth(1, 2.0);
        let outer: Arc<str> = Arc::from("outer");
        let inner: Arc<str> = Arc::from("inner");

        let value = map.get_or_insert_with(outer.clone(), |key| {
            let dependency = map.get_or_insert_with(inner.clone(), |_| 1);
            // Resolving a dependency inserted the key itself.
            assert_eq!(map.get_or_insert(key.clone(), dependency + 10), 11);
            100
        });
        assert_eq!(value, 11);
        assert_eq!(map.get(&outer), Some(11));
        assert_eq!(map.get(&inner), Some(1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn recursive_factory_resize() {
        let map: IdentityMap<Arc<usize>, usize> = IdentityMap::with_growth(1, 2.0);
        let keys = keys(128);
        let value = map.get_or_insert_with(keys[0].clone(), |_| {
            for key in &keys[1..] {
                map.get_or_insert(key.clone(), **key);
            }
            1000
        });
        assert_eq!(value, 1000);
        assert_eq!(map.len(), 128);
        assert!(map.capacity() >= 128);
        for key in &keys[1..] {
            assert_eq!(map.get(key), Some(**key));
        }
    }

    #[test]
    fn failed_factory() {
        let map: IdentityMap<Arc<usize>, usize> = IdentityMap::with_growth(1, 2.0);
        let key = Arc::new(1);

        assert_eq!(
            map.get_or_try_insert_with(key.clone(), |_| Err::<usize, _>("failure")),
            Err("failure")
        );
        assert!(!map.contains(&key));

        let result = catch_unwind(AssertUnwindSafe(|| {
            map.get_or_insert_with(key.clone(), |_| panic!("factory failure"))
        }));
        assert!(result.is_err());
        assert!(!map.contains(&key));
        assert_eq!(map.len(), 0);

        assert_eq!(map.get_or_try_insert_with(key.clone(), |_| Ok::<_, ()>(3)), Ok(3));
        assert_eq!(map.get_or_insert(key, 4), 3);
    }

    #[test]
    fn fixed_policy_chains() {
        let map: IdentityMap<Arc<usize>, usize, FixedPolicy> =
            IdentityMap::with_policy(FixedPolicy(1));
        let keys = keys(16);
        for (i, key) in keys.iter().enumerate() {
            map.get_or_insert(key.clone(), **key);
            assert_eq!(map.depth(), i + 1);
        }
        assert_eq!(map.capacity(), 1);
        for key in &keys {
            assert_eq!(map.get(key), Some(**key));
        }
    }

    #[test]
    fn resize_context() {
        let map: IdentityMap<Arc<usize>, usize, RecordingPolicy> = IdentityMap::default();
        let keys = keys(12);
        for key in &keys {
            map.get_or_insert(key.clone(), **key);
            map.get_or_insert(key.clone(), 0);
        }

        let contexts = map.policy().0.lock().unwrap().clone();
        assert_eq!(contexts.len(), keys.len());
        assert_eq!(
            contexts[0],
            ResizeContext {
                width: 2,
                max_depth: 0,
                count: 0,
                pending: 1,
            }
        );
        for (i, context) in contexts.iter().enumerate() {
            assert_eq!(context.count, i);
            assert_eq!(context.pending, 1);
            assert!(context.width.is_power_of_two());
        }
        assert!(contexts.windows(2).all(|w| w[0].width <= w[1].width));

        // Twelve entries cannot fit in two buckets without a chain of three.
        assert!(map.capacity() > 2);
    }

    #[test]
    fn type_cache() {
        fn name_of<T: 'static>(map: &IdentityMap<TypeId, &'static str>) -> &'static str {
            map.get_or_insert_with(TypeId::of::<T>(), |_| type_name::<T>())
        }

        let map = IdentityMap::new();
        assert_eq!(name_of::<u8>(&map), "u8");
        assert_eq!(name_of::<String>(&map), type_name::<String>());
        assert_eq!(name_of::<u8>(&map), "u8");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn from_iter() {
        let keys = keys(16);
        let map: IdentityMap<Arc<usize>, usize> = keys
            .iter()
            .map(|k| (k.clone(), **k))
            .chain(std::iter::once((keys[0].clone(), 1000)))
            .collect();
        assert_eq!(map.len(), 16);
        assert_eq!(map.get(&keys[0]), Some(0));
    }

    #[test]
    fn debug() {
        let map: IdentityMap<&'static str, u32> = IdentityMap::new();
        map.get_or_insert("a", 1);
        assert_eq!(format!("{map:?}"), r#"{"a": 1}"#);
    }

    #[test]
    fn read_while_resizing() {
        let num_readers = 4;
        let workload_size = 1024;
        let keys = Arc::new(keys(workload_size));
        let map: Arc<IdentityMap<Arc<usize>, usize>> =
            Arc::new(IdentityMap::with_growth(1, 2.0));
        let published = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(num_readers + 1));

        let readers: Vec<_> = (0..num_readers)
            .map(|_| {
                let keys = keys.clone();
                let map = map.clone();
                let published = published.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    loop {
                        let upper = published.load(Acquire);
                        for key in &keys[..upper] {
                            assert_eq!(map.peek_with(key, |_, v| *v), Some(**key));
                        }
                        if upper == keys.len() {
                            break;
                        }
                    }
                })
            })
            .collect();

        barrier.wait();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(map.get_or_insert(key.clone(), **key), **key);
            published.store(i + 1, Release);
        }
        for reader in readers {
            assert!(reader.join().is_ok());
        }
        assert_eq!(map.len(), workload_size);
        assert!(map.capacity() >= workload_size);
    }

    #[test]
    fn insert_many_threads() {
        let num_threads = 8;
        let workload_size = 256;
        let keys = Arc::new(keys(workload_size));
        let map: Arc<IdentityMap<Arc<usize>, Arc<usize>>> =
            Arc::new(IdentityMap::with_growth(4, 1.5));
        let barrier = Arc::new(Barrier::new(num_threads));

        let threads: Vec<_> = (0..num_threads)
            .map(|_| {
                let keys = keys.clone();
                let map = map.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let mut order: Vec<usize> = (0..keys.len()).collect();
                    order.shuffle(&mut rand::rng());
                    let mut results = vec![None; keys.len()];
                    barrier.wait();
                    for i in order {
                        results[i] = Some(map.get_or_insert(keys[i].clone(), Arc::new(i)));
                    }
                    results.into_iter().flatten().collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<Arc<usize>>> =
            threads.into_iter().map(|t| t.join().unwrap()).collect();

        for i in 0..workload_size {
            let stored = map.get(&keys[i]).unwrap();
            assert!(results.iter().all(|r| Arc::ptr_eq(&r[i], &stored)));
        }
        assert_eq!(map.len(), workload_size);
        assert_eq!(map.iter(&Guard::new()).count(), workload_size);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn insert_read_tasks() {
        let num_tasks = 8;
        let workload_size = 256;
        let keys = Arc::new(keys(workload_size));
        let map: Arc<IdentityMap<Arc<usize>, usize>> =
            Arc::new(IdentityMap::with_growth(2, 2.0));
        let barrier = Arc::new(AsyncBarrier::new(num_tasks));

        let mut tasks = Vec::with_capacity(num_tasks);
        for task_id in 0..num_tasks {
            let keys = keys.clone();
            let map = map.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                for key in keys.iter().skip(task_id).step_by(num_tasks) {
                    assert_eq!(map.get_or_insert(key.clone(), **key), **key);
                    tokio::task::yield_now().await;
                }
                for key in keys.iter() {
                    if let Some(value) = map.get(key) {
                        assert_eq!(value, **key);
                    }
                }
            }));
        }
        for task in tasks {
            assert!(task.await.is_ok());
        }
        assert_eq!(map.len(), workload_size);
    }

    proptest! {
        #[cfg_attr(miri, ignore)]
        #[test]
        fn growth_policy_prop(workload_size in 0_usize..512, initial in 0_usize..64, factor in 1.0_f64..3.0) {
            let keys = keys(workload_size);
            let map: IdentityMap<Arc<usize>, usize> = IdentityMap::with_growth(initial, factor);
            let mut capacity = map.capacity();
            for key in &keys {
                map.get_or_insert(key.clone(), **key);
                let new_capacity = map.capacity();
                prop_assert!(new_capacity >= capacity);
                prop_assert!(new_capacity.is_power_of_two());
                capacity = new_capacity;
            }
            prop_assert_eq!(map.len(), workload_size);
            prop_assert!(capacity >= workload_size);
            for key in &keys {
                prop_assert_eq!(map.get(key), Some(**key));
            }

            let guard = Guard::new();
            let mut visited = BTreeSet::new();
            for (k, v) in map.iter(&guard) {
                prop_assert_eq!(**k, *v);
                prop_assert!(visited.insert(*v));
            }
            prop_assert_eq!(visited.len(), workload_size);
        }

        #[cfg_attr(miri, ignore)]
        #[test]
        fn proportional_policy_prop(workload_size in 0_usize..512, initial in 0_usize..64, factor in 0.5_f64..3.0) {
            let keys = keys(workload_size);
            let map: IdentityMap<Arc<usize>, usize, ProportionalPolicy> =
                IdentityMap::with_policy(ProportionalPolicy::new(initial, factor));
            let mut capacity = map.capacity();
            for key in &keys {
                map.get_or_insert(key.clone(), **key);
                prop_assert!(map.capacity() >= capacity);
                capacity = map.capacity();
            }
            prop_assert_eq!(map.len(), workload_size);
            for key in &keys {
                prop_assert_eq!(map.get(key), Some(**key));
            }
            let guard = Guard::new();
            let visited: BTreeSet<usize> = map.iter(&guard).map(|(_, v)| *v).collect();
            prop_assert_eq!(visited.len(), workload_size);
            prop_assert_eq!(map.iter(&guard).count(), workload_size);
        }
    }
}
