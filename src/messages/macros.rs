/// Declares the `MessageType` registry: one variant per protocol message with
/// its wire discriminator. Duplicate codes fail to compile.
macro_rules! message_registry {
    ($($name:ident = $code:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum MessageType {
            $($name = $code),*
        }

        impl MessageType {
            pub const ALL: &'static [MessageType] = &[$(MessageType::$name),*];

            pub const fn code(self) -> u16 {
                self as u16
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(MessageType::$name => stringify!($name)),*
                }
            }

            pub const fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(MessageType::$name),)*
                    _ => None,
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($name) => Some(MessageType::$name),)*
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use message_registry;
