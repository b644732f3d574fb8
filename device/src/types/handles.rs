//! Opaque GPU object handles.

use lilium_core::RawHandle;

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident => $kind:literal;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
            pub struct $name(pub RawHandle);

            impl $name {
                /// A handle that never names a live object.
                pub const NULL: Self = Self(RawHandle::NULL);
                /// Object kind, used in error messages.
                pub const KIND: &'static str = $kind;

                pub const fn raw(self) -> RawHandle {
                    self.0
                }

                pub const fn is_null(self) -> bool {
                    self.0.is_null()
                }
            }

            impl From<RawHandle> for $name {
                fn from(raw: RawHandle) -> Self {
                    Self(raw)
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}({})", $kind, self.0)
                }
            }
        )*
    };
}

define_handle! {
    /// A primary or secondary command buffer.
    CommandBuffer => "command buffer";
    /// A command pool; buffers allocated from it are tied to one queue family.
    CommandPool => "command pool";
    /// A GPU-to-CPU completion fence.
    Fence => "fence";
    /// A GPU event usable inside command buffers.
    Event => "event";
    Buffer => "buffer";
    Image => "image";
    /// A device memory allocation.
    Memory => "memory";
    Pipeline => "pipeline";
    PipelineLayout => "pipeline layout";
    DescriptorSet => "descriptor set";
    QueryPool => "query pool";
    RenderPass => "render pass";
    Framebuffer => "framebuffer";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles() {
        assert!(Fence::NULL.is_null());
        assert!(Buffer::default().is_null());
        assert!(!Image(RawHandle::new(0, 1)).is_null());
    }

    #[test]
    fn test_display_names_kind() {
        assert_eq!(
            CommandBuffer(RawHandle::new(2, 1)).to_string(),
            "command buffer(#2v1)"
        );
    }
}
