//! Register banks of the supported targets.
//!
//! Each bank is a plain `#[repr(u8)]` enum numbered densely from zero, so the
//! hardware encoding and the allocator index coincide.

pub mod aarch64;
pub mod x86_64;

/// Define a register bank enum and its [`Register`](crate::register::Register)
/// impl.
macro_rules! register_bank {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $asm:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        #[allow(missing_docs)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every register of the bank, in index order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl $crate::register::Register for $name {
            const COUNT: usize = $name::ALL.len();

            fn index(self) -> usize {
                self as usize
            }

            fn from_index(index: usize) -> Option<Self> {
                $name::ALL.get(index).copied()
            }

            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $asm),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::register::Register::name(*self))
            }
        }
    };
}

pub(crate) use register_bank;
