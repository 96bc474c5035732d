use std::ops::Index;

use crate::utils::MyHash;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    next: usize,
}

impl<T> Entry<T> {
    /// Create a new cell with the given value.
    fn new(value: T) -> Self {
        Self { value, next: 0 }
    }
}

/// Hash-consing table.
///
/// Values are appended and never removed, so an index handed out by [`Table::put`]
/// stays valid for the lifetime of the table. Equal values always get the same index.
///
/// Index 0 is a sentinel and never holds a real value.
#[derive(Debug, Clone)]
pub struct Table<T> {
    data: Vec<Entry<T>>,

    buckets: Vec<usize>,
    bitmask: u64,
}

impl<T> Table<T>
where
    T: Default,
{
    /// Create a new table with `2^bits` initial buckets.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Table bits should be in the range 0..=31");

        let buckets_size = 1 << bits;
        let buckets = vec![0; buckets_size];
        let bitmask = (buckets_size - 1) as u64;

        Self {
            data: vec![Entry::new(T::default())],
            buckets,
            bitmask,
        }
    }
}

impl<T> Default for Table<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(10)
    }
}

impl<T> Table<T> {
    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    /// Check whether the table holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets.
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Get the reference to the value at the given index.
    pub fn value(&self, index: usize) -> &T {
        assert_ne!(index, 0, "Index is 0");
        &self.data[index].value
    }

    /// Get the index of the next cell in the same bucket.
    pub fn next(&self, index: usize) -> usize {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next
    }

    /// Iterate over `(index, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.data.iter().enumerate().skip(1).map(|(i, e)| (i, &e.value))
    }
}

impl<T> Table<T>
where
    T: MyHash,
{
    fn bucket_index(&self, value: &T) -> usize {
        (value.hash() & self.bitmask) as usize
    }

    /// Double the number of buckets once the chains get long.
    fn grow(&mut self) {
        let size = self.buckets.len() * 2;
        self.buckets = vec![0; size];
        self.bitmask = (size - 1) as u64;

        for index in 1..self.data.len() {
            let bucket = self.bucket_index(&self.data[index].value);
            self.data[index].next = self.buckets[bucket];
            self.buckets[bucket] = index;
        }
    }

    /// Find the index of a value, if it is already stored.
    pub fn get(&self, value: &T) -> Option<usize>
    where
        T: Eq,
    {
        let mut index = self.buckets[self.bucket_index(value)];
        while index != 0 {
            if &self.data[index].value == value {
                return Some(index);
            }
            index = self.data[index].next;
        }
        None
    }

    /// Put a new value into the table and return its index.
    ///
    /// If an equal value is already stored, its index is returned instead.
    pub fn put(&mut self, value: T) -> usize
    where
        T: Eq,
    {
        if let Some(index) = self.get(&value) {
            return index;
        }

        if self.data.len() > 2 * self.buckets.len() {
            self.grow();
        }

        let bucket = self.bucket_index(&value);
        let index = self.data.len();
        let mut entry = Entry::new(value);
        entry.next = self.buckets[bucket];
        self.data.push(entry);
        self.buckets[bucket] = index;

        index
    }
}

impl<T> Index<usize> for Table<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.value(index)
    }
}
