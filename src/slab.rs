//! Slab Allocator
//!
//! Fixed-size object allocation on top of a pluggable page provider. The
//! provider hands out `pagesize`-byte buffers at cache-line alignment; each
//! page carries a small embedded header followed by a grid of equal-size
//! blocks. Every block handed to the caller is prefixed with one machine
//! word naming its owning page, which makes `free` O(1) with no external
//! lookup structure.
//!
//! One page is the *active* allocation target. Pages that filled up while
//! active sit in a full set; pages that have seen frees since sit in a
//! partially-full set and are reused before the provider is asked for a
//! new page. A non-active page whose last block is freed goes straight
//! back to the provider.

use core::mem;
use core::ptr::{self, NonNull};

use crate::list::{DList, DListNode, SList, SListNode};
use crate::{adebug, max_align_up, CACHE_LINE_SIZE};

/// Provider callback that returns a `size`-byte buffer at `align` alignment,
/// or null on exhaustion.
pub type PageAllocFn = unsafe fn(size: usize, align: usize, arg: *mut ()) -> *mut u8;

/// Provider callback that accepts a buffer back.
pub type PageFreeFn = unsafe fn(ptr: *mut u8, arg: *mut ());

#[repr(C)]
struct SlabInfo {
    pagesize: usize,
    blocksize: usize,
    block_count: usize,
}

/// Header embedded at the start of every page.
#[repr(C, align(16))]
struct SlabPage {
    alloc_block_count: u32,
    /// Bump index of the next never-used block slot.
    next_free_index: u32,
    /// Blocks returned to this page, threaded through their own storage.
    freelist: SList,
    slab: *mut SlabControl,
    list_node: DListNode,
}

const _: () = assert!(
    mem::size_of::<SlabPage>() <= CACHE_LINE_SIZE,
    "slab page header must fit in one cache line"
);

/// Slab state; lives in a provider-supplied buffer.
#[repr(C, align(64))]
struct SlabControl {
    info: SlabInfo,
    active_page: *mut SlabPage,

    partially_full_pages: DList,
    full_pages: DList,

    page_alloc: PageAllocFn,
    page_free: PageFreeFn,
    provider_arg: *mut (),

    page_count: usize,
}

/// Handle to a slab allocator.
pub struct Slab {
    control: NonNull<SlabControl>,
}

// Safety: the slab exclusively owns its control structure and pages and has
// no thread affinity; moving the handle moves that ownership.
unsafe impl Send for Slab {}

impl Slab {
    /// Size of the slab control structure, as requested from the provider.
    pub const fn control_block_size() -> usize {
        mem::size_of::<SlabControl>()
    }

    /// Size of the per-block prefix: one machine word holding the owning
    /// page pointer.
    pub const fn header_size() -> usize {
        mem::size_of::<*mut SlabPage>()
    }

    /// Create a slab serving `blocksize`-byte blocks out of
    /// `pagesize`-byte pages.
    ///
    /// Both sizes are rounded up to [`crate::MAXIMUM_ALIGNOF`]. The control
    /// structure itself comes from `page_alloc`; no pages are requested
    /// until the first allocation. Returns `None` when the provider fails
    /// or when the rounded geometry leaves no room for a single block per
    /// page.
    ///
    /// # Safety
    ///
    /// The callbacks must honor the provider contract: `page_alloc` returns
    /// null or a buffer valid for `size` bytes at `align` alignment, and
    /// `page_free` accepts exactly the buffers `page_alloc` returned. `arg`
    /// must be valid for every callback invocation over the slab's life.
    pub unsafe fn create(
        pagesize: usize,
        blocksize: usize,
        page_alloc: PageAllocFn,
        page_free: PageFreeFn,
        arg: *mut (),
    ) -> Option<Slab> {
        if blocksize == 0 {
            return None;
        }

        let blocksize = max_align_up(blocksize);
        let pagesize = max_align_up(pagesize);
        if pagesize <= mem::size_of::<SlabPage>() {
            return None;
        }

        let block_count = (pagesize - mem::size_of::<SlabPage>()) / blocksize;
        if block_count == 0 {
            return None;
        }

        let raw = page_alloc(mem::size_of::<SlabControl>(), CACHE_LINE_SIZE, arg);
        let control = NonNull::new(raw as *mut SlabControl)?;

        control.as_ptr().write(SlabControl {
            info: SlabInfo {
                pagesize,
                blocksize,
                block_count,
            },
            active_page: ptr::null_mut(),
            partially_full_pages: DList::new(),
            full_pages: DList::new(),
            page_alloc,
            page_free,
            provider_arg: arg,
            page_count: 0,
        });

        adebug!(
            "slab: created, {} byte pages, {} byte blocks, {} blocks per page",
            pagesize,
            blocksize,
            block_count
        );

        Some(Slab { control })
    }

    /// Allocate one block with at least `blocksize - header_size()` usable
    /// bytes, or `None` when the provider is exhausted and no page has
    /// room.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let ctl = unsafe { self.control.as_mut() };

        if let Some(mem) = alloc_from_active_page(ctl) {
            return Some(mem);
        }

        // The active page could not serve, so it is necessarily full;
        // retire it before looking for a replacement.
        if !ctl.active_page.is_null() {
            unsafe {
                debug_assert!(page_is_full(ctl.active_page, &ctl.info));
                ctl.full_pages
                    .push_head(&mut (*ctl.active_page).list_node);
            }
            ctl.active_page = ptr::null_mut();
        }

        if let Some(node) = unsafe { ctl.partially_full_pages.pop_head() } {
            let page = page_from_node(node.as_ptr());
            debug_assert!(!unsafe { page_is_empty(page) });
            ctl.active_page = page;
            return alloc_from_active_page(ctl);
        }

        ctl.active_page = page_alloc_from_provider(ctl)?;
        alloc_from_active_page(ctl)
    }

    /// Return a block to its page.
    ///
    /// The owning page is recovered from the block's prefix word. A
    /// non-active page that becomes empty is handed back to the provider
    /// within this call; a full page that gains room moves to the
    /// partially-full set. The active page is never evicted here.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this slab's `alloc` and not freed
    /// since.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let ctl_ptr = self.control.as_ptr();
        let ctl = &mut *ctl_ptr;

        let block = ptr.as_ptr().sub(Self::header_size());
        let page = (block as *mut *mut SlabPage).read();
        let was_full = page_is_full(page, &ctl.info);

        debug_assert!((*page).slab == ctl_ptr);
        debug_assert!((*page).alloc_block_count > 0);

        (*page).alloc_block_count -= 1;
        (*page).freelist.push_head(block as *mut SListNode);

        if page == ctl.active_page {
            return;
        }

        if page_is_empty(page) {
            let set = if was_full {
                &mut ctl.full_pages
            } else {
                &mut ctl.partially_full_pages
            };
            set.unlink(&mut (*page).list_node);
            page_free_to_provider(ctl, page);
        } else if was_full {
            ctl.full_pages.unlink(&mut (*page).list_node);
            ctl.partially_full_pages.push_head(&mut (*page).list_node);
        }
    }

    /// Release every page and the control structure back to the provider.
    /// All outstanding blocks are dangling afterwards.
    pub fn destroy(self) {
        unsafe {
            let ctl = self.control.as_ptr();

            if !(*ctl).active_page.is_null() {
                let page = (*ctl).active_page;
                (*ctl).active_page = ptr::null_mut();
                page_free_to_provider(&mut *ctl, page);
            }

            while let Some(node) = (*ctl).partially_full_pages.pop_head() {
                page_free_to_provider(&mut *ctl, page_from_node(node.as_ptr()));
            }

            while let Some(node) = (*ctl).full_pages.pop_head() {
                page_free_to_provider(&mut *ctl, page_from_node(node.as_ptr()));
            }

            let page_free = (*ctl).page_free;
            let arg = (*ctl).provider_arg;
            page_free(ctl as *mut u8, arg);
        }
    }

    /// Total bytes currently held from the provider as pages.
    pub fn size(&self) -> usize {
        let ctl = self.control_ref();
        ctl.page_count * ctl.info.pagesize
    }

    /// Page size after alignment rounding.
    pub fn page_size(&self) -> usize {
        self.control_ref().info.pagesize
    }

    /// Block size after alignment rounding, prefix word included.
    pub fn block_size(&self) -> usize {
        self.control_ref().info.blocksize
    }

    pub fn block_count_per_page(&self) -> usize {
        self.control_ref().info.block_count
    }

    fn control_ref(&self) -> &SlabControl {
        unsafe { self.control.as_ref() }
    }
}

/// Recover a page header from its embedded set-list node.
fn page_from_node(node: *mut DListNode) -> *mut SlabPage {
    unsafe { (node as *mut u8).sub(mem::offset_of!(SlabPage, list_node)) as *mut SlabPage }
}

fn alloc_from_active_page(ctl: &mut SlabControl) -> Option<NonNull<u8>> {
    if ctl.active_page.is_null() {
        return None;
    }
    let block = unsafe { page_alloc_block(ctl.active_page, &ctl.info)? };
    Some(unsafe { user_pointer(block, ctl.active_page) })
}

/// Take one block from `page`: recycled blocks off the free list first,
/// then the bump index over never-used slots.
unsafe fn page_alloc_block(page: *mut SlabPage, info: &SlabInfo) -> Option<*mut u8> {
    if let Some(node) = (*page).freelist.pop_head() {
        (*page).alloc_block_count += 1;
        return Some(node.as_ptr() as *mut u8);
    }

    let index = (*page).next_free_index as usize;
    if index < info.block_count {
        let block = (page as *mut u8).add(mem::size_of::<SlabPage>() + info.blocksize * index);
        (*page).next_free_index += 1;
        (*page).alloc_block_count += 1;
        return Some(block);
    }

    None
}

/// Stamp the owning page into the block prefix and step past it.
unsafe fn user_pointer(block: *mut u8, page: *mut SlabPage) -> NonNull<u8> {
    (block as *mut *mut SlabPage).write(page);
    NonNull::new_unchecked(block.add(Slab::header_size()))
}

unsafe fn page_is_empty(page: *mut SlabPage) -> bool {
    (*page).alloc_block_count == 0
}

unsafe fn page_is_full(page: *mut SlabPage, info: &SlabInfo) -> bool {
    !page.is_null() && (*page).alloc_block_count as usize == info.block_count
}

fn page_alloc_from_provider(ctl: &mut SlabControl) -> Option<*mut SlabPage> {
    let raw = unsafe { (ctl.page_alloc)(ctl.info.pagesize, CACHE_LINE_SIZE, ctl.provider_arg) };
    let page = raw as *mut SlabPage;
    if page.is_null() {
        adebug!("slab: page provider exhausted at {} pages", ctl.page_count);
        return None;
    }

    ctl.page_count += 1;
    unsafe {
        ptr::addr_of_mut!((*page).alloc_block_count).write(0);
        ptr::addr_of_mut!((*page).next_free_index).write(0);
        ptr::addr_of_mut!((*page).freelist).write(SList::new());
        ptr::addr_of_mut!((*page).slab).write(ctl as *mut SlabControl);
        ptr::addr_of_mut!((*page).list_node).write(DListNode::new());
    }

    Some(page)
}

unsafe fn page_free_to_provider(ctl: &mut SlabControl, page: *mut SlabPage) {
    ctl.page_count -= 1;
    (ctl.page_free)(page as *mut u8, ctl.provider_arg);
}
