//! Stack objects of one function.

use super::mir::FrameIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameObject {
    pub size: u32,
    pub align: u32,
    /// Offset from the frame pointer. Fixed objects are created with their
    /// final offset; the rest are assigned one by frame layout.
    pub offset: i64,
    pub fixed: bool,
}

/// Frame state collected during instruction selection and consumed by frame
/// lowering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
    objects: Vec<FrameObject>,
    /// Largest outgoing-argument area of any call, header gap included.
    pub max_call_frame: u32,
    /// Set once a call sequence has been emitted.
    pub adjusts_stack: bool,
    /// Dynamic allocas move `sp` during the body.
    pub has_var_sized_objects: bool,
    /// Final frame size, set by frame layout.
    pub stack_size: u32,
    /// First variadic argument slot of a varargs function.
    pub vararg_index: Option<FrameIndex>,
    /// Slot the scavenger spills through when no register is free.
    pub scavenging_slot: Option<FrameIndex>,
}

impl FrameInfo {
    pub fn create_stack_object(&mut self, size: u32, align: u32) -> FrameIndex {
        self.objects.push(FrameObject {
            size,
            align: align.max(1),
            offset: 0,
            fixed: false,
        });
        FrameIndex(self.objects.len() - 1)
    }

    /// An object at a known frame-pointer offset, such as an incoming stack
    /// argument.
    pub fn create_fixed_object(&mut self, size: u32, offset: i64) -> FrameIndex {
        self.objects.push(FrameObject {
            size,
            align: 1,
            offset,
            fixed: true,
        });
        FrameIndex(self.objects.len() - 1)
    }

    #[must_use]
    pub fn object(&self, index: FrameIndex) -> &FrameObject {
        &self.objects[index.0]
    }

    pub fn object_mut(&mut self, index: FrameIndex) -> &mut FrameObject {
        &mut self.objects[index.0]
    }

    #[must_use]
    pub fn objects(&self) -> &[FrameObject] {
        &self.objects
    }

    /// Records a call needing `bytes` of outgoing stack.
    pub fn adjust_for_call(&mut self, bytes: u32) {
        self.adjusts_stack = true;
        self.max_call_frame = self.max_call_frame.max(bytes);
    }

    /// Upper bound of the frame before layout: every object at worst-case
    /// alignment plus the outgoing area.
    #[must_use]
    pub fn estimate_stack_size(&self) -> u64 {
        self.objects
            .iter()
            .filter(|o| !o.fixed)
            .map(|o| u64::from(o.size) + u64::from(o.align) - 1)
            .sum::<u64>()
            + u64::from(self.max_call_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_objects_keep_their_offset() {
        let mut frame = FrameInfo::default();
        let local = frame.create_stack_object(4, 2);
        let arg = frame.create_fixed_object(2, 6);
        assert_eq!(frame.object(arg).offset, 6);
        assert!(frame.object(arg).fixed);
        assert!(!frame.object(local).fixed);
        assert_eq!(frame.estimate_stack_size(), 5);
    }

    #[test]
    fn call_frames_keep_the_maximum() {
        let mut frame = FrameInfo::default();
        frame.adjust_for_call(6);
        frame.adjust_for_call(4);
        assert!(frame.adjusts_stack);
        assert_eq!(frame.max_call_frame, 6);
    }
}
