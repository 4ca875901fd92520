use crate::bit_tools::{low_bits_mask, merge, split};
use crate::{CritBit, CritBit64Cow};

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn validate_tree<V>(t: &CritBit<V>) {
    assert!(t.check_tree(), "structural check failed");
    let reachable = match t.dims() {
        None => t.iter().map(|it| it.count()),
        Some(_) => t.iter_kd().map(|it| it.count()),
    };
    assert_eq!(
        reachable,
        Ok(t.len()),
        "iterated entry count must match CritBit::len"
    );
}

fn in_box(key: &[u64], min: &[u64], max: &[u64]) -> bool {
    key.iter()
        .zip(min.iter().zip(max))
        .all(|(k, (lo, hi))| lo <= k && k <= hi)
}

#[derive(Clone, Debug)]
enum Op<K> {
    Insert(K, u64),
    Remove(K),
    Get(K),
    Query(K, K),
    Shrink,
}

fn word_strategy() -> impl Strategy<Value = u64> + Clone {
    // Mostly words from a small alphabet so keys share long prefixes and
    // collide often.
    prop_oneof![
        Just(0u64),
        Just(u64::MAX),
        (0u64..16).prop_map(|v| v << 60),
        0u64..16,
        any::<u64>(),
    ]
}

fn ops_strategy<K: Clone + std::fmt::Debug>(
    key: impl Strategy<Value = K> + Clone,
) -> impl Strategy<Value = Vec<Op<K>>> {
    let op = prop_oneof![
        45 => (key.clone(), any::<u64>()).prop_map(|(k, v)| Op::Insert(k, v)),
        25 => key.clone().prop_map(Op::Remove),
        20 => key.clone().prop_map(Op::Get),
        9 => (key.clone(), key.clone()).prop_map(|(a, b)| Op::Query(a, b)),
        1 => Just(Op::Shrink),
    ];
    prop::collection::vec(op, 0..=1000)
}

fn key_1d() -> impl Strategy<Value = Vec<u64>> + Clone {
    prop::collection::vec(word_strategy(), 2)
}

const KD_WIDTH: u32 = 6;
const KD_DIMS: usize = 3;

fn key_kd() -> impl Strategy<Value = Vec<u64>> + Clone {
    prop::collection::vec(0u64..(1 << KD_WIDTH), KD_DIMS)
}

fn key_64() -> impl Strategy<Value = u64> + Clone {
    prop_oneof![0u64..64, (0u64..64).prop_map(|v| v << 58), any::<u64>()]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_1d(ops in ops_strategy(key_1d())) {
        let mut t: CritBit<u64> = CritBit::create_1d(128).unwrap();
        let mut m: BTreeMap<Vec<u64>, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.put(&key, value).unwrap();
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(&key).unwrap();
                    let old_m = m.remove(&key);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.get(&key).unwrap().copied();
                    let got_m = m.get(&key).copied();
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Query(a, b) => {
                    let (min, max) = if a <= b { (a, b) } else { (b, a) };
                    let expected: Vec<(Vec<u64>, u64)> =
                        m.range(min.clone()..=max.clone()).map(|(k, v)| (k.clone(), *v)).collect();
                    let got: Vec<(Vec<u64>, u64)> =
                        t.query(&min, &max).unwrap().map(|(k, v)| (k, *v)).collect();
                    prop_assert_eq!(&got, &expected);
                    let masked: Vec<(Vec<u64>, u64)> =
                        t.query_with_mask(&min, &max).unwrap().map(|(k, v)| (k, *v)).collect();
                    prop_assert_eq!(&masked, &expected);
                }
                Op::Shrink => {
                    t.shrink_to_fit();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let got: Vec<(Vec<u64>, u64)> = t.iter().unwrap().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(Vec<u64>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_equivalence_kd(ops in ops_strategy(key_kd())) {
        let mut t: CritBit<u64> = CritBit::create_kd(KD_WIDTH, KD_DIMS).unwrap();
        let mut m: BTreeMap<Vec<u64>, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.put_kd(&key, value).unwrap();
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    let old_t = t.remove_kd(&key).unwrap();
                    let old_m = m.remove(&key);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.get_kd(&key).unwrap().copied();
                    let got_m = m.get(&key).copied();
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Query(a, b) => {
                    let min: Vec<u64> = a.iter().zip(&b).map(|(x, y)| *x.min(y)).collect();
                    let max: Vec<u64> = a.iter().zip(&b).map(|(x, y)| *x.max(y)).collect();
                    let expected: BTreeSet<(Vec<u64>, u64)> = m
                        .iter()
                        .filter(|(k, _)| in_box(k, &min, &max))
                        .map(|(k, v)| (k.clone(), *v))
                        .collect();
                    let got: Vec<(Vec<u64>, u64)> =
                        t.query_kd(&min, &max).unwrap().map(|(k, v)| (k, *v)).collect();
                    prop_assert_eq!(got.len(), expected.len());
                    prop_assert_eq!(&got.iter().cloned().collect::<BTreeSet<_>>(), &expected);
                    let masked: Vec<(Vec<u64>, u64)> =
                        t.query_with_mask(&min, &max).unwrap().map(|(k, v)| (k, *v)).collect();
                    prop_assert_eq!(&masked, &got);
                    prop_assert_eq!(
                        t.is_range_empty(&min, &max, false).unwrap(),
                        expected.is_empty()
                    );
                }
                Op::Shrink => {
                    t.shrink_to_fit();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let got: BTreeMap<Vec<u64>, u64> = t.iter_kd().unwrap().map(|(k, v)| (k, *v)).collect();
        prop_assert_eq!(got, m);
    }

    #[test]
    fn prop_equivalence_cow(ops in ops_strategy(key_64())) {
        let t: CritBit64Cow<u64> = CritBit64Cow::new();
        let mut m: BTreeMap<u64, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.put(key, value).map(|v| *v);
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Remove(key) => {
                    let old_t = t.remove(key).map(|v| *v);
                    let old_m = m.remove(&key);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    let got_t = t.get(key).map(|v| *v);
                    let got_m = m.get(&key).copied();
                    prop_assert_eq!(got_t, got_m);
                }
                Op::Query(a, b) => {
                    let expected: Vec<u64> = m.range(a.min(b)..=a.max(b)).map(|(k, _)| *k).collect();
                    let got: Vec<u64> = t.query(a.min(b), a.max(b)).map(|(k, _)| k).collect();
                    prop_assert_eq!(got, expected);

                    // Interpreted as bit masks rather than bounds.
                    let expected: Vec<u64> = m.keys().copied().filter(|k| (k | a) & b == *k).collect();
                    let got: Vec<u64> = t.query_with_mask(a, b).map(|(k, _)| k).collect();
                    prop_assert_eq!(got, expected);
                }
                Op::Shrink => {
                    let copy = t.clone();
                    prop_assert_eq!(copy.len(), m.len());
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        prop_assert!(t.check_tree());
        let got: Vec<(u64, u64)> = t.iter().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(u64, u64)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_split_inverts_merge(
        dims in 1usize..8,
        bits in 1u32..=64,
        words in prop::collection::vec(any::<u64>(), 8),
    ) {
        let values: Vec<u64> = words[..dims].iter().map(|w| w & low_bits_mask(bits)).collect();
        let merged = merge(dims, bits, &values);
        prop_assert_eq!(merged.len(), (dims * bits as usize).div_ceil(64));
        prop_assert_eq!(split(dims, bits, &merged), values);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

/// Keys whose first differing bits sit inside infixes, at word boundaries
/// and in the last bit.
fn small_key_set() -> Vec<Vec<u64>> {
    vec![
        vec![0, 0],
        vec![0, 1],
        vec![0, 1 << 63],
        vec![1 << 63, 0],
        vec![(1 << 63) | 1, 0],
        vec![u64::MAX, u64::MAX],
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_key_set();

    for_each_permutation(&keys, |perm| {
        let mut t: CritBit<u64> = CritBit::create_1d(128).unwrap();
        let mut m: BTreeMap<Vec<u64>, u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64;
            assert_eq!(t.put(&k, v).unwrap(), m.insert(k, v));
            validate_tree(&t);
        }

        let got: Vec<(Vec<u64>, u64)> = t.iter().unwrap().map(|(k, v)| (k, *v)).collect();
        let expected: Vec<(Vec<u64>, u64)> = m.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_key_set();

    // Insert in a fixed order, then remove in all permutations.
    let mut base_tree: CritBit<u64> = CritBit::create_1d(128).unwrap();
    let mut base_map: BTreeMap<Vec<u64>, u64> = BTreeMap::new();
    for (i, k) in keys.iter().enumerate() {
        let v = i as u64;
        assert_eq!(base_tree.put(k, v).unwrap(), base_map.insert(k.clone(), v));
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_tree.clone();
        let mut m = base_map.clone();

        for k in perm {
            assert_eq!(t.remove(&k).unwrap(), m.remove(&k));
            assert_eq!(t.len(), m.len());
            validate_tree(&t);
        }
        assert!(t.is_empty());
    });
}

#[test]
fn exhaustive_remove_order_cow() {
    let keys: Vec<u64> = vec![0, 1, 2, 3, 1 << 63, u64::MAX];

    let base: CritBit64Cow<u64> = CritBit64Cow::new();
    for k in keys.iter() {
        base.put(*k, *k);
    }

    for_each_permutation(&keys, |perm| {
        let t = base.clone();
        let mut left: BTreeSet<u64> = keys.iter().copied().collect();

        for k in perm {
            assert_eq!(t.remove(k).map(|v| *v), Some(k));
            left.remove(&k);
            assert!(t.check_tree());
            assert_eq!(t.iter().map(|(k, _)| k).collect::<BTreeSet<_>>(), left);
        }
        assert!(t.is_empty());
        // The shared base is untouched.
        assert_eq!(base.len(), keys.len());
    });
}
