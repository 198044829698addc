// Plain-old-data element types a receive buffer can be made of.
pub trait Align1: bytemuck::Pod {}

impl Align1 for u32 {}
impl Align1 for i32 {}
impl Align1 for u64 {}
impl Align1 for i64 {}
impl Align1 for f32 {}
impl Align1 for f64 {}

// Trait to generalize over primitive number types that are at least 4 bytes aligned,
// receive buffers of these types can be reinterpreted as `f32` payloads.
pub trait Align4: Align1 {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for u64 {}
impl Align4 for i64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
