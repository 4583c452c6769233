use hashbrown::HashMap;

/// Positions into the append-only transaction list, grouped by key.
pub type PosIndex<K> = HashMap<K, Vec<usize>>;
