//! Datatype and reduction-op registry (component A).
//!
//! A [`Datatype`] describes the wire layout and memory footprint of a
//! value, exactly as `spec.md` §3/§4.A specifies: `{type tag, flags
//! (predefined?/contiguous?), size (wire bytes), extent (memory
//! stride), true-lb, true-extent}`. Predefined types are process-global
//! interned singletons (`spec.md` §4.A: "identity comparison is
//! legal"); user types own a [`ConvertorFactory`] when non-contiguous.
//!
//! Buffers are represented as raw byte ranges ([`RawBuf`]) rather than
//! generic `&[T]`, matching the domain: a `Datatype` describes memory
//! whose Rust element type is not known to this crate (it may belong to
//! a user's own struct with padding). This mirrors how `vesper`
//! (our pack's bare-metal teacher-adjacent example) addresses
//! hardware memory through raw pointers rather than typed references --
//! the same escape hatch is appropriate here, for the same reason: the
//! layout is described by runtime metadata, not by the type system.

use crate::error::{UcgError, UcgResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// A raw, type-erased view over a buffer used by pack/unpack state
/// machines and by `dt_memcpy`.
///
/// # Safety
/// The constructor is `unsafe`: the caller must ensure the pointer is
/// valid and exclusively accessible (for the mutable view) for as long
/// as the `RawBuf` is used.
#[derive(Clone, Copy)]
pub struct RawBuf {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: RawBuf is a dumb (ptr, len) pair; send-ability is a property
// of whatever the pointer actually addresses, which the caller of
// `RawBuf::new`/`new_const` has already asserted is safe to move across
// the thread that drives this op's progress loop.
unsafe impl Send for RawBuf {}

impl RawBuf {
    /// Build a mutable raw view over `len` bytes starting at `ptr`.
    ///
    /// # Safety
    /// See the type-level safety note.
    #[must_use]
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Build a raw view over an existing mutable slice.
    #[must_use]
    pub fn from_mut_slice(buf: &mut [u8]) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    /// Build a read-only raw view over an existing slice.
    #[must_use]
    pub fn from_slice(buf: &[u8]) -> Self {
        Self {
            ptr: buf.as_ptr().cast_mut(),
            len: buf.len(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow as an immutable slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: constructors guarantee `ptr..ptr+len` is valid for the
        // lifetime of this borrow.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Borrow as a mutable slice.
    ///
    /// # Safety
    /// The caller must not alias this with another live mutable or
    /// immutable borrow of the same bytes.
    #[must_use]
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

/// Incremental pack state produced by [`ConvertorFactory::start_pack`].
///
/// Mirrors `spec.md`'s `dt_pack(state, offset, iobuf, &len)`: repeated
/// calls with non-overlapping `(offset, len)` windows covering
/// `[0, count*dt.size)` must reproduce a contiguous copy of the source
/// buffer's logical content (Testable Property 7).
pub trait PackState: Send {
    /// Serialize up to `out.len()` bytes of packed output starting at
    /// logical byte `offset`. Returns the number of bytes actually
    /// written; `0` means the sequence is exhausted.
    fn pack(&mut self, offset: usize, out: &mut [u8]) -> UcgResult<usize>;
}

/// Incremental unpack state produced by [`ConvertorFactory::start_unpack`].
pub trait UnpackState: Send {
    /// Consume `input` (packed bytes) and scatter it into the target
    /// buffer starting at logical byte `offset`. Returns the number of
    /// bytes consumed.
    fn unpack(&mut self, offset: usize, input: &[u8]) -> UcgResult<usize>;
}

/// Builds pack/unpack state machines for a non-contiguous user
/// datatype. Every non-contiguous [`Datatype`] carries one of these
/// (`spec.md` §4.A: "a convertor is mandatory" when `size != extent`).
pub trait ConvertorFactory: Send + Sync {
    fn start_pack(&self, buf: RawBuf, count: usize) -> Box<dyn PackState>;
    fn start_unpack(&self, buf: RawBuf, count: usize) -> Box<dyn UnpackState>;
}

/// Predefined element kinds. `spec.md` §3: "signed/unsigned 8/16/32/64,
/// half/float/double".
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PredefinedKind {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F16,
    F32,
    F64,
}

impl PredefinedKind {
    const ALL: [PredefinedKind; 11] = [
        PredefinedKind::I8,
        PredefinedKind::U8,
        PredefinedKind::I16,
        PredefinedKind::U16,
        PredefinedKind::I32,
        PredefinedKind::U32,
        PredefinedKind::I64,
        PredefinedKind::U64,
        PredefinedKind::F16,
        PredefinedKind::F32,
        PredefinedKind::F64,
    ];

    #[must_use]
    pub fn size(self) -> usize {
        match self {
            PredefinedKind::I8 | PredefinedKind::U8 => 1,
            PredefinedKind::I16 | PredefinedKind::U16 | PredefinedKind::F16 => 2,
            PredefinedKind::I32 | PredefinedKind::U32 | PredefinedKind::F32 => 4,
            PredefinedKind::I64 | PredefinedKind::U64 | PredefinedKind::F64 => 8,
        }
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(
            self,
            PredefinedKind::F16 | PredefinedKind::F32 | PredefinedKind::F64
        )
    }
}

/// A runtime type identifier. Predefined types are singletons; user
/// types get a process-unique id at creation time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TypeTag {
    Predefined(PredefinedKind),
    User(u64),
}

struct DatatypeInner {
    tag: TypeTag,
    predefined: bool,
    contiguous: bool,
    size: usize,
    extent: usize,
    true_lb: isize,
    true_extent: usize,
    convertor_factory: Option<Arc<dyn ConvertorFactory>>,
}

/// A description of a value's wire layout and memory footprint.
///
/// Cheaply cloneable (`Arc` inside): clones of the same `Datatype`
/// always point at the same inner record, so `Datatype::is_same_as`
/// (pointer identity) is meaningful for predefined types exactly as
/// `spec.md` requires.
#[derive(Clone)]
pub struct Datatype(Arc<DatatypeInner>);

impl Datatype {
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.0.tag
    }

    #[must_use]
    pub fn is_predefined(&self) -> bool {
        self.0.predefined
    }

    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        self.0.contiguous
    }

    /// Wire size of one element, in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.size
    }

    /// Memory stride of one element, in bytes. `extent >= size` always
    /// holds for non-contiguous types (`spec.md` §4.A invariant).
    #[must_use]
    pub fn extent(&self) -> usize {
        self.0.extent
    }

    #[must_use]
    pub fn true_lb(&self) -> isize {
        self.0.true_lb
    }

    #[must_use]
    pub fn true_extent(&self) -> usize {
        self.0.true_extent
    }

    /// Pointer-identity comparison, valid for predefined types per
    /// `spec.md` §4.A.
    #[must_use]
    pub fn is_same_as(&self, other: &Datatype) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn convertor_factory(&self) -> Option<&Arc<dyn ConvertorFactory>> {
        self.0.convertor_factory.as_ref()
    }
}

/// Parameters for creating a user-defined, non-predefined datatype.
pub struct UserTypeParams {
    pub size: usize,
    pub extent: usize,
    pub true_lb: isize,
    pub true_extent: usize,
    /// Mandatory when `size != extent` (non-contiguous).
    pub convertor_factory: Option<Arc<dyn ConvertorFactory>>,
}

static PREDEFINED: OnceLock<Vec<Datatype>> = OnceLock::new();
static NEXT_USER_TYPE_ID: AtomicU64 = AtomicU64::new(1);

fn predefined_table() -> &'static Vec<Datatype> {
    PREDEFINED.get_or_init(|| {
        PredefinedKind::ALL
            .iter()
            .map(|&kind| {
                let size = kind.size();
                Datatype(Arc::new(DatatypeInner {
                    tag: TypeTag::Predefined(kind),
                    predefined: true,
                    contiguous: true,
                    size,
                    extent: size,
                    true_lb: 0,
                    true_extent: size,
                    convertor_factory: None,
                }))
            })
            .collect()
    })
}

/// `dt_create` for a predefined type tag: returns the process-global
/// singleton. `dt_destroy` on the result is a no-op (see
/// [`dt_destroy`]).
#[must_use]
pub fn dt_predefined(kind: PredefinedKind) -> Datatype {
    predefined_table()[PredefinedKind::ALL.iter().position(|k| *k == kind).unwrap()].clone()
}

/// `dt_create` for a user type. Requires `size`, `extent`, `true_lb`,
/// `true_extent`; if `size != extent` a convertor is mandatory and the
/// type is marked non-contiguous (`spec.md` §4.A).
pub fn dt_create_user(params: UserTypeParams) -> UcgResult<Datatype> {
    let contiguous = params.size == params.extent;
    if !contiguous && params.convertor_factory.is_none() {
        return Err(UcgError::InvalidParam);
    }
    if !contiguous && params.extent < params.size {
        return Err(UcgError::InvalidParam);
    }
    let id = NEXT_USER_TYPE_ID.fetch_add(1, Ordering::Relaxed);
    Ok(Datatype(Arc::new(DatatypeInner {
        tag: TypeTag::User(id),
        predefined: false,
        contiguous,
        size: params.size,
        extent: params.extent,
        true_lb: params.true_lb,
        true_extent: params.true_extent,
        convertor_factory: params.convertor_factory,
    })))
}

/// `dt_destroy`: no-op for predefined types (they are never freed);
/// drops the user type's last reference otherwise. Kept as an explicit
/// call for parity with the C lifecycle even though Rust's `Drop` would
/// do the same thing implicitly.
pub fn dt_destroy(dt: Datatype) {
    drop(dt);
}

/// Outcome of [`dt_memcpy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// All source bytes fit in the destination.
    Full,
    /// The source was larger than the destination; `copied` destination
    /// bytes were filled and the rest of the source was discarded.
    Truncated { copied: usize },
}

/// Copy `scount` elements of `src_dt` from `src` into `dcount` elements
/// of `dst_dt` in `dst`.
///
/// Four cases by contiguity (`spec.md` §4.A):
/// - contiguous -> contiguous: a direct byte copy, truncating if the
///   source is larger.
/// - non-contiguous -> contiguous: pack `src` through its convertor
///   directly into `dst`.
/// - contiguous -> non-contiguous: unpack `src` through `dst_dt`'s
///   convertor.
/// - non-contiguous -> non-contiguous: pack into a contiguous scratch
///   buffer, then unpack the scratch into `dst`.
///
/// Returns `Ok(Full)` if all source bytes fit; `Ok(Truncated{..})` if
/// `dst` was smaller (destination filled with as much as fits); other
/// errors imply nothing was copied.
pub fn dt_memcpy(
    dst: &mut [u8],
    dcount: usize,
    dst_dt: &Datatype,
    src: &[u8],
    scount: usize,
    src_dt: &Datatype,
) -> UcgResult<CopyOutcome> {
    let src_logical_bytes = scount * src_dt.size();
    let dst_logical_bytes = dcount * dst_dt.size();

    match (src_dt.is_contiguous(), dst_dt.is_contiguous()) {
        (true, true) => {
            let n = src_logical_bytes.min(dst_logical_bytes);
            if src.len() < src_logical_bytes || dst.len() < n {
                return Err(UcgError::InvalidParam);
            }
            dst[..n].copy_from_slice(&src[..n]);
            if src_logical_bytes > dst_logical_bytes {
                Ok(CopyOutcome::Truncated { copied: n })
            } else {
                Ok(CopyOutcome::Full)
            }
        }
        (false, true) => {
            let factory = src_dt.convertor_factory().ok_or(UcgError::InvalidParam)?;
            let mut state = factory.start_pack(RawBuf::from_slice(src), scount);
            let n = src_logical_bytes.min(dst_logical_bytes);
            let written = pack_into(&mut *state, &mut dst[..n])?;
            finalize_copy(written, src_logical_bytes, dst_logical_bytes)
        }
        (true, false) => {
            let factory = dst_dt.convertor_factory().ok_or(UcgError::InvalidParam)?;
            let mut state = factory.start_unpack(RawBuf::from_mut_slice(dst), dcount);
            let n = src_logical_bytes.min(dst_logical_bytes);
            let consumed = unpack_from(&mut *state, &src[..n])?;
            finalize_copy(consumed, src_logical_bytes, dst_logical_bytes)
        }
        (false, false) => {
            let src_factory = src_dt.convertor_factory().ok_or(UcgError::InvalidParam)?;
            let dst_factory = dst_dt.convertor_factory().ok_or(UcgError::InvalidParam)?;
            let mut scratch = vec![0u8; src_logical_bytes];
            let mut pack_state = src_factory.start_pack(RawBuf::from_slice(src), scount);
            pack_into(&mut *pack_state, &mut scratch)?;

            let n = src_logical_bytes.min(dst_logical_bytes);
            let mut unpack_state = dst_factory.start_unpack(RawBuf::from_mut_slice(dst), dcount);
            let consumed = unpack_from(&mut *unpack_state, &scratch[..n])?;
            finalize_copy(consumed, src_logical_bytes, dst_logical_bytes)
        }
    }
}

fn finalize_copy(moved: usize, src_bytes: usize, dst_bytes: usize) -> UcgResult<CopyOutcome> {
    if src_bytes > dst_bytes {
        Ok(CopyOutcome::Truncated { copied: moved })
    } else {
        Ok(CopyOutcome::Full)
    }
}

fn pack_into(state: &mut dyn PackState, out: &mut [u8]) -> UcgResult<usize> {
    let mut offset = 0usize;
    while offset < out.len() {
        let n = state.pack(offset, &mut out[offset..])?;
        if n == 0 {
            break;
        }
        offset += n;
    }
    Ok(offset)
}

fn unpack_from(state: &mut dyn UnpackState, input: &[u8]) -> UcgResult<usize> {
    let mut offset = 0usize;
    while offset < input.len() {
        let n = state.unpack(offset, &input[offset..])?;
        if n == 0 {
            break;
        }
        offset += n;
    }
    Ok(offset)
}

// ---------------------------------------------------------------------
// Reduction ops
// ---------------------------------------------------------------------

/// A user-supplied reduction callback: `dst[i] := f(src[i], dst[i])`
/// over `count` elements described by `dt`.
pub trait UserReduceFn: Send + Sync {
    fn reduce(&self, src: &[u8], dst: &mut [u8], count: usize, dt: &Datatype) -> UcgResult<()>;
}

/// Predefined reduction kinds, one per numeric predefined [`Datatype`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PredefinedReduceOp {
    Max,
    Min,
    Sum,
    Prod,
}

/// A reduction operation, predefined or user-supplied.
#[derive(Clone)]
pub enum ReduceOp {
    Predefined(PredefinedReduceOp),
    User {
        commutative: bool,
        persistent: bool,
        func: Arc<dyn UserReduceFn>,
    },
}

impl ReduceOp {
    #[must_use]
    pub fn is_commutative(&self) -> bool {
        match self {
            ReduceOp::Predefined(_) => true,
            ReduceOp::User { commutative, .. } => *commutative,
        }
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        match self {
            ReduceOp::Predefined(_) => true,
            ReduceOp::User { persistent, .. } => *persistent,
        }
    }
}

macro_rules! numeric_reduce {
    ($kind:expr, $src:expr, $dst:expr, $count:expr, $op:expr, [$(($variant:ident, $ty:ty)),+ $(,)?]) => {
        match $kind {
            $(
                PredefinedKind::$variant => {
                    let sz = std::mem::size_of::<$ty>();
                    for i in 0..$count {
                        let off = i * sz;
                        let s = <$ty>::from_ne_bytes($src[off..off + sz].try_into().unwrap());
                        let d = <$ty>::from_ne_bytes($dst[off..off + sz].try_into().unwrap());
                        let r: $ty = match $op {
                            PredefinedReduceOp::Max => if s > d { s } else { d },
                            PredefinedReduceOp::Min => if s < d { s } else { d },
                            PredefinedReduceOp::Sum => s + d,
                            PredefinedReduceOp::Prod => s * d,
                        };
                        $dst[off..off + sz].copy_from_slice(&r.to_ne_bytes());
                    }
                    return Ok(());
                }
            )+
            _ => return Err(UcgError::Unsupported),
        }
    };
}

/// `op_reduce`: `dst[i] := op(dst[i], src[i])`. Predefined ops dispatch
/// by (op-type, predefined dt-type); user ops call the user callback.
///
/// For a commutative predefined op this satisfies Testable Property 8
/// (`reduce(a,b) == reduce(b,a)` elementwise) because each branch
/// applies a symmetric scalar operator.
pub fn op_reduce(op: &ReduceOp, src: &[u8], dst: &mut [u8], count: usize, dt: &Datatype) -> UcgResult<()> {
    match op {
        ReduceOp::User { func, .. } => func.reduce(src, dst, count, dt),
        ReduceOp::Predefined(kind_op) => {
            let TypeTag::Predefined(kind) = dt.tag() else {
                return Err(UcgError::Unsupported);
            };
            numeric_reduce!(
                kind,
                src,
                dst,
                count,
                *kind_op,
                [
                    (I8, i8),
                    (U8, u8),
                    (I16, i16),
                    (U16, u16),
                    (I32, i32),
                    (U32, u32),
                    (I64, i64),
                    (U64, u64),
                    (F32, f32),
                    (F64, f64),
                ]
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_types_are_interned() {
        let a = dt_predefined(PredefinedKind::I32);
        let b = dt_predefined(PredefinedKind::I32);
        assert!(a.is_same_as(&b));
        assert_eq!(a.size(), 4);
        assert!(a.is_contiguous());
    }

    #[test]
    fn memcpy_contig_identity() {
        let dt = dt_predefined(PredefinedKind::U32);
        let src: Vec<u8> = (0u32..4).flat_map(u32::to_ne_bytes).collect();
        let mut dst = vec![0u8; src.len()];
        let outcome = dt_memcpy(&mut dst, 4, &dt, &src, 4, &dt).unwrap();
        assert_eq!(outcome, CopyOutcome::Full);
        assert_eq!(dst, src);
    }

    #[test]
    fn memcpy_truncates_when_dst_smaller() {
        let dt = dt_predefined(PredefinedKind::U32);
        let src: Vec<u8> = (0u32..12).flat_map(u32::to_ne_bytes).collect();
        let mut dst = vec![0u8; 11 * 4];
        let outcome = dt_memcpy(&mut dst, 11, &dt, &src, 12, &dt).unwrap();
        assert_eq!(outcome, CopyOutcome::Truncated { copied: 44 });
        assert_eq!(&dst[..], &src[..44]);
    }

    #[test]
    fn reduce_sum_is_commutative() {
        let dt = dt_predefined(PredefinedKind::I32);
        let a = 7i32.to_ne_bytes();
        let b = 5i32.to_ne_bytes();
        let op = ReduceOp::Predefined(PredefinedReduceOp::Sum);

        let mut dst1 = b;
        op_reduce(&op, &a, &mut dst1, 1, &dt).unwrap();
        let mut dst2 = a;
        op_reduce(&op, &b, &mut dst2, 1, &dt).unwrap();
        assert_eq!(dst1, dst2);
    }
}
