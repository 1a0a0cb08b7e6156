/*!
Byte size helpers.
*/

use super::umem;

pub const fn kb(n: umem) -> umem {
    n << 10
}

pub const fn mb(n: umem) -> umem {
    n << 20
}

pub const fn gb(n: umem) -> umem {
    n << 30
}

/// Rounds `len` up to a whole number of pages.
///
/// `page_size` has to be a power of two.
pub const fn page_align_up(len: umem, page_size: umem) -> umem {
    (len + page_size - 1) & !(page_size - 1)
}
