//! Очередь с приоритетами на основе арены.
//!
//! Каждый элемент одновременно состоит в двух двусвязных списках:
//! - цепочке своего приоритета (FIFO внутри уровня);
//! - глобальной последовательной цепочке (порядок вставки по всей очереди).
//!
//! Последовательная цепочка нужна только для смены приоритета: элемент
//! встаёт в новую цепочку сразу после ближайшего предшественника из неё,
//! поэтому относительный порядок вставки не теряется.
//!
//! Ссылки это индексы в арене, дескрипторы проверяются поколением слота.
//! Голодание не предотвращается: постоянный поток `Highest` может бесконечно
//! задерживать нижние уровни.

use super::{
    errors::QueueError,
    model::Priority,
};
use std::collections::BTreeMap;


const REUSABLE_CHAIN_CACHE: usize = 10;

/// Дескриптор элемента в очереди
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Links {
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Clone, Copy)]
enum Link {
    Sequential,
    Priority,
}

type Ends = (Option<u32>, Option<u32>);

struct Entry<T> {
    data: T,
    // Some(..) тогда и только тогда, когда элемент в очереди
    chain: Option<Priority>,
    sequential: Links,
    priority: Links,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

#[derive(Debug)]
struct PriorityChain {
    priority: Priority,
    head: Option<u32>,
    tail: Option<u32>,
    count: usize,
}

impl PriorityChain {
    fn new(priority: Priority) -> Self {
        Self {
            priority,
            head: None,
            tail: None,
            count: 0,
        }
    }
}


pub struct PriorityQueue<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    chains: BTreeMap<Priority, PriorityChain>,
    reusable_chains: Vec<PriorityChain>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            chains: BTreeMap::new(),
            reusable_chains: Vec::with_capacity(REUSABLE_CHAIN_CACHE),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Количество непустых цепочек приоритетов (не элементов!)
    #[inline]
    pub fn count(&self) -> usize {
        self.chains.len()
    }

    /// Общее количество элементов в очереди
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Наивысший заполненный приоритет или `Priority::Invalid` для пустой очереди
    pub fn max_priority(&self) -> Priority {
        self.chains
            .last_key_value()
            .map(|(priority, _)| *priority)
            .unwrap_or(Priority::Invalid)
    }

    pub fn enqueue(&mut self, priority: Priority, data: T) -> Result<QueueHandle, QueueError> {
        if !priority.is_valid() {
            return Err(QueueError::InvalidPriority);
        }
        self.ensure_chain(priority);

        let handle = self.allocate(data);
        let idx = handle.index;

        let ends = (self.head, self.tail);
        let ends = self.splice_in(Link::Sequential, idx, self.tail, ends);
        (self.head, self.tail) = ends;
        self.len += 1;

        let after = self.chain(priority).tail;
        self.insert_in_chain(idx, priority, after);

        Ok(handle)
    }

    pub fn dequeue(&mut self) -> Result<T, QueueError> {
        let idx = match self.chains.last_key_value() {
            Some((_, chain)) => chain.head.expect("non-empty priority chain without a head"),
            None => return Err(QueueError::Empty),
        };
        Ok(self.unlink(idx))
    }

    pub fn peek(&self) -> Option<&T> {
        let (_, chain) = self.chains.last_key_value()?;
        let idx = chain.head?;
        Some(&self.entry(idx).data)
    }

    pub fn remove_item(&mut self, handle: QueueHandle) -> Result<T, QueueError> {
        let idx = self.resolve(handle)?;
        Ok(self.unlink(idx))
    }

    pub fn change_item_priority(&mut self, handle: QueueHandle, priority: Priority) -> Result<(), QueueError> {
        if !priority.is_valid() {
            return Err(QueueError::InvalidPriority);
        }
        let idx = self.resolve(handle)?;

        self.remove_from_chain(idx);
        self.ensure_chain(priority);

        let after = if self.chain(priority).head.is_none() {
            None
        } else {
            // идём назад по последовательной цепочке до элемента из целевой цепочки
            let mut cursor = self.entry(idx).sequential.prev;
            while let Some(candidate) = cursor {
                let entry = self.entry(candidate);
                if entry.chain == Some(priority) {
                    break;
                }
                cursor = entry.sequential.prev;
            }
            cursor
        };
        self.insert_in_chain(idx, priority, after);
        Ok(())
    }

    pub fn is_queued(&self, handle: QueueHandle) -> bool {
        self.resolve(handle).is_ok()
    }

    pub fn get(&self, handle: QueueHandle) -> Option<&T> {
        let idx = self.resolve(handle).ok()?;
        Some(&self.entry(idx).data)
    }

    pub fn priority_of(&self, handle: QueueHandle) -> Option<Priority> {
        let idx = self.resolve(handle).ok()?;
        self.entry(idx).chain
    }

    fn resolve(&self, handle: QueueHandle) -> Result<u32, QueueError> {
        match self.slots.get(handle.index as usize) {
            Some(Slot { generation, entry: Some(entry) }) if *generation == handle.generation => {
                debug_assert!(entry.chain.is_some(), "live entry outside of any chain");
                Ok(handle.index)
            }
            _ => Err(QueueError::StaleHandle),
        }
    }

    fn allocate(&mut self, data: T) -> QueueHandle {
        let entry = Entry {
            data,
            chain: None,
            sequential: Links::default(),
            priority: Links::default(),
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                QueueHandle { index, generation: slot.generation }
            }
            None => {
                let index = u32::try_from(self.slots.len()).expect("priority queue arena overflow");
                self.slots.push(Slot { generation: 0, entry: Some(entry) });
                QueueHandle { index, generation: 0 }
            }
        }
    }

    /// Полностью убирает элемент из обеих цепочек и освобождает слот
    fn unlink(&mut self, idx: u32) -> T {
        self.remove_from_chain(idx);

        let ends = (self.head, self.tail);
        (self.head, self.tail) = self.splice_out(Link::Sequential, idx, ends);
        self.len -= 1;

        let slot = &mut self.slots[idx as usize];
        let entry = slot.entry.take().expect("unlinking a vacant slot");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        entry.data
    }

    fn ensure_chain(&mut self, priority: Priority) {
        if self.chains.contains_key(&priority) {
            return;
        }
        let chain = match self.reusable_chains.pop() {
            Some(mut chain) => {
                chain.priority = priority;
                chain
            }
            None => PriorityChain::new(priority),
        };
        self.chains.insert(priority, chain);
    }

    fn insert_in_chain(&mut self, idx: u32, priority: Priority, after: Option<u32>) {
        debug_assert!(self.entry(idx).chain.is_none(), "entry already belongs to a chain");

        let chain = self.chain(priority);
        let ends = (chain.head, chain.tail);
        let ends = self.splice_in(Link::Priority, idx, after, ends);

        let chain = self.chain_mut(priority);
        (chain.head, chain.tail) = ends;
        chain.count += 1;
        self.entry_mut(idx).chain = Some(priority);
    }

    fn remove_from_chain(&mut self, idx: u32) {
        let priority = self.entry(idx).chain.expect("entry is not in a priority chain");

        let chain = self.chain(priority);
        let ends = (chain.head, chain.tail);
        let ends = self.splice_out(Link::Priority, idx, ends);

        let chain = self.chain_mut(priority);
        (chain.head, chain.tail) = ends;
        chain.count -= 1;

        if chain.count == 0 {
            if let Some(mut chain) = self.chains.remove(&priority) {
                if self.reusable_chains.len() < REUSABLE_CHAIN_CACHE {
                    chain.priority = Priority::Invalid;
                    self.reusable_chains.push(chain);
                }
            }
        }
        self.entry_mut(idx).chain = None;
    }

    /// Вставляет `idx` после `after` (`None`: в голову), возвращает новые концы списка
    fn splice_in(&mut self, link: Link, idx: u32, after: Option<u32>, ends: Ends) -> Ends {
        let (mut head, mut tail) = ends;
        let next = match after {
            Some(after) => self.links_mut(link, after).next,
            None => head,
        };

        let links = self.links_mut(link, idx);
        debug_assert!(links.prev.is_none() && links.next.is_none());
        links.prev = after;
        links.next = next;

        match after {
            Some(after) => self.links_mut(link, after).next = Some(idx),
            None => head = Some(idx),
        }
        match next {
            Some(next) => self.links_mut(link, next).prev = Some(idx),
            None => tail = Some(idx),
        }
        (head, tail)
    }

    fn splice_out(&mut self, link: Link, idx: u32, ends: Ends) -> Ends {
        let (mut head, mut tail) = ends;
        let Links { prev, next } = std::mem::take(self.links_mut(link, idx));

        match prev {
            Some(prev) => self.links_mut(link, prev).next = next,
            None => {
                debug_assert_eq!(head, Some(idx), "head should point to the removed entry");
                head = next;
            }
        }
        match next {
            Some(next) => self.links_mut(link, next).prev = prev,
            None => {
                debug_assert_eq!(tail, Some(idx), "tail should point to the removed entry");
                tail = prev;
            }
        }
        (head, tail)
    }

    #[inline]
    fn links_mut(&mut self, link: Link, idx: u32) -> &mut Links {
        let entry = self.entry_mut(idx);
        match link {
            Link::Sequential => &mut entry.sequential,
            Link::Priority => &mut entry.priority,
        }
    }

    #[inline]
    fn entry(&self, idx: u32) -> &Entry<T> {
        self.slots[idx as usize]
            .entry
            .as_ref()
            .expect("queue link points at a vacant slot")
    }

    #[inline]
    fn entry_mut(&mut self, idx: u32) -> &mut Entry<T> {
        self.slots[idx as usize]
            .entry
            .as_mut()
            .expect("queue link points at a vacant slot")
    }

    #[inline]
    fn chain(&self, priority: Priority) -> &PriorityChain {
        self.chains.get(&priority).expect("priority chain must exist")
    }

    #[inline]
    fn chain_mut(&mut self, priority: Priority) -> &mut PriorityChain {
        self.chains.get_mut(&priority).expect("priority chain must exist")
    }
}
