/*!
Abstraction over a address inside of the inspected process.
*/

use std::default::Default;
use std::fmt;
use std::ops;

/// The memory type used for addresses and lengths.
///
/// 64 bits wide independent of the host, so 32-bit and 64-bit images are handled alike.
#[allow(non_camel_case_types)]
pub type umem = u64;

/// Signed counterpart of [`umem`].
#[allow(non_camel_case_types)]
pub type imem = i64;

/// This type represents a address in the inspected process.
/// It internally holds a `umem` value but can also be used
/// when working with 32-bit images.
///
/// Arithmetic through the `ops` traits will not handle overflow,
/// use the `checked_*` and `wrapping_*` functions near the top of the address space.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct Address(umem);

impl Address {
    /// A address with the value of zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use memscope::types::Address;
    ///
    /// println!("address: {}", Address::NULL);
    /// ```
    pub const NULL: Address = Address(0);

    /// Checks whether the address is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use memscope::types::Address;
    ///
    /// assert!(Address::NULL.is_null());
    /// assert!(!Address::from(0x1000u64).is_null());
    /// ```
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Converts the address into a `umem` value.
    #[inline]
    pub const fn to_umem(self) -> umem {
        self.0
    }

    /// Aligns the containing address to the given page size.
    /// It returns the base address of the containing page.
    ///
    /// # Examples
    ///
    /// ```
    /// use memscope::types::{Address, size};
    ///
    /// let addr = Address::from(0x1234u64);
    /// let aligned = addr.as_page_aligned(size::kb(4));
    /// assert_eq!(aligned, Address::from(0x1000u64));
    /// ```
    pub const fn as_page_aligned(self, page_size: umem) -> Self {
        Self(self.0 - self.0 % page_size)
    }

    /// Rounds the address up to the next multiple of `page_size`.
    ///
    /// Already aligned addresses are returned unchanged.
    /// Returns `None` if rounding up would overflow.
    ///
    /// # Examples
    ///
    /// ```
    /// use memscope::types::{Address, size};
    ///
    /// assert_eq!(Address::from(0x1001u64).checked_page_align_up(size::kb(4)), Some(Address::from(0x2000u64)));
    /// assert_eq!(Address::from(0x2000u64).checked_page_align_up(size::kb(4)), Some(Address::from(0x2000u64)));
    /// assert_eq!(Address::from(!0u64).checked_page_align_up(size::kb(4)), None);
    /// ```
    pub fn checked_page_align_up(self, page_size: umem) -> Option<Self> {
        let rem = self.0 % page_size;
        if rem == 0 {
            Some(self)
        } else {
            self.0.checked_add(page_size - rem).map(Self)
        }
    }

    /// Checked addition of a length. Returns `None` on overflow.
    #[inline]
    pub fn checked_add(self, len: umem) -> Option<Self> {
        self.0.checked_add(len).map(Self)
    }

    /// Checked addition of a signed displacement. Returns `None` on over- or underflow.
    #[inline]
    pub fn checked_offset(self, offset: imem) -> Option<Self> {
        if offset >= 0 {
            self.0.checked_add(offset as umem).map(Self)
        } else {
            self.0.checked_sub(offset.unsigned_abs()).map(Self)
        }
    }

    /// Wrapping (modular) addition. Computes `self + rhs`,
    /// wrapping around at the boundary of the type.
    pub const fn wrapping_add(self, other: Self) -> Self {
        Self(self.0.wrapping_add(other.0))
    }

    /// Wrapping (modular) subtraction. Computes `self - rhs`,
    /// wrapping around at the boundary of the type.
    pub const fn wrapping_sub(self, other: Self) -> Self {
        Self(self.0.wrapping_sub(other.0))
    }
}

/// Returns a address with a value of zero.
impl Default for Address {
    fn default() -> Self {
        Self::NULL
    }
}

macro_rules! impl_address_from {
    ($type_name:ident) => {
        impl From<$type_name> for Address {
            #[inline(always)]
            fn from(item: $type_name) -> Self {
                Self(item as umem)
            }
        }
    };
}

impl_address_from!(u32);
impl_address_from!(u64);
impl_address_from!(usize);

/// Converts an `Address` back into its raw value.
impl From<Address> for umem {
    #[inline(always)]
    fn from(address: Address) -> umem {
        address.0
    }
}

macro_rules! impl_address_arithmetic_unsigned {
    ($type_name:ident) => {
        impl ops::Add<$type_name> for Address {
            type Output = Self;

            fn add(self, other: $type_name) -> Self {
                Self(self.0 + (other as umem))
            }
        }

        impl ops::AddAssign<$type_name> for Address {
            fn add_assign(&mut self, other: $type_name) {
                *self = Self(self.0 + (other as umem))
            }
        }

        impl ops::Sub<$type_name> for Address {
            type Output = Address;

            fn sub(self, other: $type_name) -> Address {
                Self(self.0 - (other as umem))
            }
        }

        impl ops::SubAssign<$type_name> for Address {
            fn sub_assign(&mut self, other: $type_name) {
                *self = Self(self.0 - (other as umem))
            }
        }
    };
}

impl_address_arithmetic_unsigned!(u32);
impl_address_arithmetic_unsigned!(u64);
impl_address_arithmetic_unsigned!(usize);

/// Subtracts a `Address` from a `Address` resulting in a signed distance.
///
/// # Examples
///
/// ```
/// use memscope::types::Address;
///
/// assert_eq!(Address::from(10u64) - Address::from(5u64), 5);
/// assert_eq!(Address::from(5u64) - Address::from(10u64), -5);
/// ```
impl ops::Sub for Address {
    type Output = imem;

    fn sub(self, other: Self) -> imem {
        if self.0 > other.0 {
            (self.0 - other.0) as imem
        } else {
            -((other.0 - self.0) as imem)
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}
impl fmt::UpperHex for Address {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}
impl fmt::LowerHex for Address {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}
