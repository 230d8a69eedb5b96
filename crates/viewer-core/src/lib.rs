use pdf_engine::{PageSize, FALLBACK_PAGE_RATIO};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

pub const DEFAULT_PAGE_SPACING_PX: f32 = 16.0;
pub const DEFAULT_RENDER_CACHE_CAPACITY: usize = 8;

/// Where one page surface sits in the vertically stacked document view, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSlot {
    pub page_number: u32,
    pub top_px: f32,
    pub width_px: f32,
    pub height_px: f32,
}

impl PageSlot {
    pub fn bottom_px(&self) -> f32 {
        self.top_px + self.height_px
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && x < self.width_px && y >= self.top_px && y < self.bottom_px()
    }

    /// Backing raster size in device pixels.
    pub fn device_size(&self, dpr: f32) -> (u32, u32) {
        let dpr = if dpr > 0.0 { dpr } else { 1.0 };
        ((self.width_px * dpr).round() as u32, (self.height_px * dpr).round() as u32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    render_width_px: f32,
    dpr: f32,
    spacing_px: f32,
    slots: Vec<PageSlot>,
}

impl PageLayout {
    /// Lays pages 1..=n out top to bottom at `render_width_px`. Pages whose size is not known yet
    /// get the fallback height ratio.
    pub fn new(render_width_px: u32, dpr: f32, page_sizes: &[Option<PageSize>]) -> Self {
        Self::with_spacing(render_width_px, dpr, page_sizes, DEFAULT_PAGE_SPACING_PX)
    }

    pub fn with_spacing(
        render_width_px: u32,
        dpr: f32,
        page_sizes: &[Option<PageSize>],
        spacing_px: f32,
    ) -> Self {
        let width = render_width_px as f32;
        let mut cursor = 0.0;
        let mut slots = Vec::with_capacity(page_sizes.len());

        for (index, size) in page_sizes.iter().enumerate() {
            let height = match size {
                Some(size) => size.height_for_width(width),
                None => width * FALLBACK_PAGE_RATIO,
            };

            slots.push(PageSlot {
                page_number: index as u32 + 1,
                top_px: cursor,
                width_px: width,
                height_px: height.round(),
            });
            cursor += height.round() + spacing_px;
        }

        Self { render_width_px: width, dpr: if dpr > 0.0 { dpr } else { 1.0 }, spacing_px, slots }
    }

    pub fn render_width_px(&self) -> f32 {
        self.render_width_px
    }

    pub fn dpr(&self) -> f32 {
        self.dpr
    }

    pub fn spacing_px(&self) -> f32 {
        self.spacing_px
    }

    pub fn slots(&self) -> &[PageSlot] {
        &self.slots
    }

    pub fn slot(&self, page_number: u32) -> Option<&PageSlot> {
        page_number.checked_sub(1).and_then(|index| self.slots.get(index as usize))
    }

    pub fn page_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// First page in layout order. Snapshot capture always uses this page.
    pub fn first_page(&self) -> Option<u32> {
        self.slots.first().map(|slot| slot.page_number)
    }

    pub fn total_height_px(&self) -> f32 {
        match self.slots.last() {
            Some(last) => last.bottom_px(),
            None => 0.0,
        }
    }

    /// Page under a point in document coordinates. Gaps between pages belong to no page.
    pub fn page_at_point(&self, x: f32, y: f32) -> Option<u32> {
        self.slots.iter().find(|slot| slot.contains(x, y)).map(|slot| slot.page_number)
    }
}

/// Key for a rendered base bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub page_number: u32,
    pub target_width_px: u32,
}

pub type BaseRenderCache<V> = LruCache<RenderKey, V>;

#[derive(Debug, Clone)]
pub struct LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), map: HashMap::new(), order: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.touch(key);
        }

        self.map.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.map.contains_key(&key) {
            self.map.insert(key.clone(), value);
            self.touch(&key);
            return;
        }

        self.make_room();
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    /// Returns the cached value, producing and storing it first on a miss. A failed producer
    /// leaves the cache unchanged.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        produce: impl FnOnce() -> Result<V, E>,
    ) -> Result<&V, E> {
        if self.map.contains_key(&key) {
            self.touch(&key);
        } else {
            let value = produce()?;
            self.insert(key.clone(), value);
        }

        Ok(&self.map[&key])
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    fn make_room(&mut self) {
        while self.map.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&oldest);
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(index) = self.order.iter().position(|existing| existing == key) {
            if let Some(found) = self.order.remove(index) {
                self.order.push_back(found);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter() -> Option<PageSize> {
        Some(PageSize { width_pt: 612.0, height_pt: 792.0 })
    }

    #[test]
    fn pages_stack_vertically_with_spacing() {
        let layout = PageLayout::with_spacing(612, 1.0, &[letter(), letter()], 10.0);

        let first = layout.slot(1).expect("page 1 should be laid out");
        let second = layout.slot(2).expect("page 2 should be laid out");

        assert_eq!(first.top_px, 0.0);
        assert_eq!(first.height_px, 792.0);
        assert_eq!(second.top_px, 802.0);
        assert_eq!(layout.total_height_px(), 1594.0);
    }

    #[test]
    fn unknown_page_size_uses_fallback_ratio() {
        let layout = PageLayout::new(1000, 1.0, &[None]);
        let slot = layout.slot(1).expect("page 1 should be laid out");

        assert_eq!(slot.height_px, 1414.0);
    }

    #[test]
    fn first_page_is_page_one() {
        let layout = PageLayout::new(800, 2.0, &[letter(), None, letter()]);
        assert_eq!(layout.first_page(), Some(1));
        assert_eq!(layout.page_count(), 3);

        let empty = PageLayout::new(800, 1.0, &[]);
        assert_eq!(empty.first_page(), None);
        assert_eq!(empty.page_at_point(0.0, 0.0), None);
    }

    #[test]
    fn device_size_applies_pixel_ratio() {
        let layout = PageLayout::new(612, 2.0, &[letter()]);
        let slot = layout.slot(1).expect("page 1 should be laid out");

        assert_eq!(slot.device_size(layout.dpr()), (1224, 1584));
    }

    #[test]
    fn hit_testing_skips_gaps_between_pages() {
        let layout = PageLayout::with_spacing(100, 1.0, &[None, None], 20.0);

        assert_eq!(layout.page_at_point(50.0, 10.0), Some(1));
        assert_eq!(layout.page_at_point(50.0, 150.0), None);
        assert_eq!(layout.page_at_point(50.0, 170.0), Some(2));
        assert_eq!(layout.page_at_point(150.0, 10.0), None);
        assert_eq!(layout.spacing_px(), 20.0);
    }

    #[test]
    fn lru_cache_evicts_oldest_entry() {
        let mut cache = LruCache::new(2);

        cache.insert(1_u32, "one");
        cache.insert(2_u32, "two");
        cache.insert(3_u32, "three");

        assert!(!cache.contains_key(&1));
        assert!(cache.contains_key(&2));
        assert!(cache.contains_key(&3));
    }

    #[test]
    fn lru_cache_refreshes_recently_accessed_entry() {
        let mut cache = LruCache::new(2);

        cache.insert(1_u32, "one");
        cache.insert(2_u32, "two");

        let _ = cache.get(&1);
        cache.insert(3_u32, "three");

        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
        assert!(cache.contains_key(&3));
    }

    #[test]
    fn render_cache_only_produces_on_miss() {
        let mut cache: BaseRenderCache<u32> = LruCache::new(DEFAULT_RENDER_CACHE_CAPACITY);
        let key = RenderKey { page_number: 1, target_width_px: 800 };
        let mut renders = 0;

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with(key, || {
                    renders += 1;
                    Ok::<_, ()>(42)
                })
                .expect("render should succeed");
            assert_eq!(*value, 42);
        }
        assert_eq!(renders, 1);

        let failed = cache.get_or_try_insert_with(
            RenderKey { page_number: 2, target_width_px: 800 },
            || Err("renderer failed"),
        );
        assert_eq!(failed, Err("renderer failed"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
