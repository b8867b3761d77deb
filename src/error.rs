use core::alloc::Layout;

/// The error type for fallible reservation and insertion.
///
/// Returned by [`HashTable::try_reserve`], [`HashTable::try_entry`] and the
/// map/set wrappers built on top of them. When one of these is returned the
/// table is left exactly as it was before the call.
///
/// [`HashTable::try_reserve`]: crate::HashTable::try_reserve
/// [`HashTable::try_entry`]: crate::HashTable::try_entry
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TryReserveError {
    /// The requested element count cannot be addressed by the table's
    /// 32-bit bucket and slot indices, or the computed size overflowed.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// The allocator returned an error for the given layout.
    #[error("memory allocation of {} bytes failed", .layout.size())]
    AllocError {
        /// The layout of the allocation request that failed.
        layout: Layout,
    },
}

/// Whether a failed reservation should be reported or be fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fallibility {
    Fallible,
    Infallible,
}

impl Fallibility {
    #[cold]
    #[inline(never)]
    pub(crate) fn capacity_overflow(self) -> TryReserveError {
        match self {
            Fallibility::Fallible => TryReserveError::CapacityOverflow,
            Fallibility::Infallible => panic!("capacity overflow"),
        }
    }

    #[cold]
    #[inline(never)]
    pub(crate) fn alloc_err(self, layout: Layout) -> TryReserveError {
        match self {
            Fallibility::Fallible => TryReserveError::AllocError { layout },
            Fallibility::Infallible => alloc::alloc::handle_alloc_error(layout),
        }
    }
}

/// Reserve room for exactly `additional` more items in `vec`, translating the
/// allocator's opaque error into a [`TryReserveError`] carrying the layout
/// that was asked for.
pub(crate) fn reserve_exact<T>(
    vec: &mut alloc::vec::Vec<T>,
    additional: usize,
    fallibility: Fallibility,
) -> Result<(), TryReserveError> {
    if vec.try_reserve_exact(additional).is_ok() {
        return Ok(());
    }

    let wanted = match vec.len().checked_add(additional) {
        Some(wanted) => wanted,
        None => return Err(fallibility.capacity_overflow()),
    };
    match Layout::array::<T>(wanted) {
        Ok(layout) => Err(fallibility.alloc_err(layout)),
        Err(_) => Err(fallibility.capacity_overflow()),
    }
}
