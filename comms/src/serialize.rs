pub trait Serialize<'a> {
    /// Writes the owned part of `self` into `buf` and optionally returns a borrowed
    /// tail that the sender writes right after it without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
