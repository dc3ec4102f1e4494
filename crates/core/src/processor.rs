//! The cooperative processor contract: the single-threaded worker interface
//! a host runtime drives per vertex instance, plus the pending-item
//! resumption idiom and two concrete processors (`GroupP`/`AggregateP` and
//! `TransformP`) built on the aggregate-operation algebra and `Traverser`.
//!
//! A processor must never block: every method call drains what it can and
//! returns, trusting the runtime to call it again. The only state that
//! survives across calls is (a) whatever the processor keeps internally
//! (e.g. `GroupP`'s per-key accumulators) and (b) at most one item that an
//! `Outbox` refused, tracked by [`EmitCursor`].

use std::collections::HashMap;
use std::hash::Hash;

use crate::aggregate::AggregateOperation;
use crate::watermark::Watermark;

/// Which output port(s) an emitted item targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordinal {
    /// A single numbered output port.
    Output(usize),
    /// Every output port (used for watermark forwarding).
    All,
}

/// A bounded queue a processor reads incoming items from. `poll` never
/// blocks: an empty inbox just means nothing is available *yet*.
pub trait Inbox<T> {
    fn poll(&mut self) -> Option<T>;
}

/// A bounded queue a processor writes outgoing items to.
///
/// `offer` returns the item back in `Err` when the outbox is full, rather
/// than signalling failure and dropping it: the processor is expected to
/// hand that item to [`EmitCursor`] and retry on the next call.
pub trait Outbox<T> {
    fn offer(&mut self, ordinal: Ordinal, item: T) -> Result<(), T>;
}

/// The "pending item" resumption token, modelled as an explicit
/// `Idle | Pending(item)` state rather than a nullable field (see
/// `DESIGN.md`).
///
/// At most one item is ever held here: once an outbox rejects something,
/// no further emission is attempted until that one item is accepted.
#[derive(Default)]
pub struct EmitCursor<T> {
    pending: Option<(Ordinal, T)>,
}

impl<T> EmitCursor<T> {
    pub fn new() -> Self {
        EmitCursor { pending: None }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Tries to emit `item` to `ordinal`. If a previous item is still
    /// pending, or the outbox refuses this one, the item is retained here
    /// and `false` is returned; the caller must stop producing further
    /// output for this call.
    pub fn try_emit(&mut self, outbox: &mut dyn Outbox<T>, ordinal: Ordinal, item: T) -> bool {
        if self.pending.is_some() {
            return false;
        }
        match outbox.offer(ordinal, item) {
            Ok(()) => true,
            Err(rejected) => {
                self.pending = Some((ordinal, rejected));
                false
            }
        }
    }

    /// Resumes any pending item first, then drains `traverser` into
    /// `outbox` one item at a time via `ordinal`. Returns `true` iff the
    /// traverser was fully drained (no pending item remains).
    pub fn emit_from_traverser(
        &mut self,
        outbox: &mut dyn Outbox<T>,
        ordinal: Ordinal,
        traverser: &mut dyn Iterator<Item = T>,
    ) -> bool {
        if let Some((pending_ordinal, item)) = self.pending.take() {
            if !self.try_emit(outbox, pending_ordinal, item) {
                return false;
            }
        }
        for item in traverser {
            if !self.try_emit(outbox, ordinal, item) {
                return false;
            }
        }
        true
    }
}

/// The per-instance contract every vertex is realized as at runtime.
///
/// A reference implementation of this contract dispatches on `ordinal` via
/// specialized `process0..processN` methods, a trick for helping an older
/// compiler specialize each arity; Rust's monomorphization already gives
/// every concrete `Processor` its own specialized code, so here there is
/// just one generic entry point that takes the ordinal as a plain argument.
pub trait Processor<In, Out> {
    /// Drains as much of `inbox` into `outbox` as possible without
    /// blocking. Returns `true` iff the inbox was fully drained; `false`
    /// means the outbox pushed back and the runtime should re-invoke later.
    fn process(&mut self, ordinal: usize, inbox: &mut dyn Inbox<In>, outbox: &mut dyn Outbox<Out>) -> bool;

    /// Forwards a watermark to every output ordinal. Processors with
    /// ordinal-specific watermark semantics (there are none in this crate)
    /// would override this.
    fn try_process_watermark(&mut self, outbox: &mut dyn Outbox<Out>, wm: Watermark) -> bool
    where
        Out: From<Watermark>,
    {
        let mut cursor = EmitCursor::new();
        cursor.try_emit(outbox, Ordinal::All, Out::from(wm))
    }

    /// Called after every inbox has signalled end-of-input. Default: no
    /// final output, processor is immediately done.
    fn complete(&mut self, _outbox: &mut dyn Outbox<Out>) -> bool {
        true
    }
}

/// Per-key grouping and aggregation: accumulates one [`AggregateOperation`]
/// accumulator per distinct key seen on its single input ordinal, then
/// emits `map_to_output_fn(key, finish(acc))` for every group from a lazy
/// traverser once `complete` is called.
///
/// Looking up an absent key creates a *fresh* accumulator via the
/// operation's `create` function (not the function value itself) before
/// accumulating into it.
pub struct GroupP<K, Acc, Item, Res, Out> {
    key_fn: Box<dyn Fn(&Item) -> K>,
    op: AggregateOperation<Acc, Item, Res>,
    map_to_output_fn: Box<dyn Fn(K, Res) -> Out>,
    groups: HashMap<K, Acc>,
    cursor: EmitCursor<Out>,
    complete_items: Option<std::vec::IntoIter<Out>>,
}

impl<K, Acc, Item, Res, Out> GroupP<K, Acc, Item, Res, Out>
where
    K: Eq + Hash + 'static,
    Acc: 'static,
    Item: 'static,
    Res: 'static,
    Out: 'static,
{
    pub fn new(
        key_fn: impl Fn(&Item) -> K + 'static,
        op: AggregateOperation<Acc, Item, Res>,
        map_to_output_fn: impl Fn(K, Res) -> Out + 'static,
    ) -> Self {
        GroupP {
            key_fn: Box::new(key_fn),
            op,
            map_to_output_fn: Box::new(map_to_output_fn),
            groups: HashMap::new(),
            cursor: EmitCursor::new(),
            complete_items: None,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl<K, Acc, Item, Res, Out> Processor<Item, Out> for GroupP<K, Acc, Item, Res, Out>
where
    K: Eq + Hash + 'static,
    Acc: 'static,
    Item: 'static,
    Res: 'static,
    Out: 'static,
{
    fn process(&mut self, _ordinal: usize, inbox: &mut dyn Inbox<Item>, _outbox: &mut dyn Outbox<Out>) -> bool {
        while let Some(item) = inbox.poll() {
            let key = (self.key_fn)(&item);
            let op = &self.op;
            let acc = self.groups.entry(key).or_insert_with(|| op.create());
            op.accumulate(acc, &item);
        }
        true
    }

    fn complete(&mut self, outbox: &mut dyn Outbox<Out>) -> bool {
        if self.complete_items.is_none() {
            let groups = std::mem::take(&mut self.groups);
            let op = &self.op;
            let map_to_output_fn = &self.map_to_output_fn;
            let items: Vec<Out> = groups
                .into_iter()
                .map(|(key, mut acc)| map_to_output_fn(key, op.finish(&mut acc)))
                .collect();
            self.complete_items = Some(items.into_iter());
        }
        let items = self.complete_items.as_mut().unwrap();
        self.cursor.emit_from_traverser(outbox, Ordinal::Output(0), items)
    }
}

/// A [`GroupP`] with a single constant key: equivalent to global
/// aggregation over the entire input stream instead of per-key grouping.
pub struct AggregateP<Acc, Item, Res, Out> {
    inner: GroupP<(), Acc, Item, Res, Out>,
}

impl<Acc, Item, Res, Out> AggregateP<Acc, Item, Res, Out>
where
    Acc: 'static,
    Item: 'static,
    Res: 'static,
    Out: 'static,
{
    pub fn new(op: AggregateOperation<Acc, Item, Res>, map_to_output_fn: impl Fn(Res) -> Out + 'static) -> Self {
        AggregateP {
            inner: GroupP::new(|_: &Item| (), op, move |(), res| map_to_output_fn(res)),
        }
    }
}

impl<Acc, Item, Res, Out> Processor<Item, Out> for AggregateP<Acc, Item, Res, Out>
where
    Acc: 'static,
    Item: 'static,
    Res: 'static,
    Out: 'static,
{
    fn process(&mut self, ordinal: usize, inbox: &mut dyn Inbox<Item>, outbox: &mut dyn Outbox<Out>) -> bool {
        self.inner.process(ordinal, inbox, outbox)
    }

    fn complete(&mut self, outbox: &mut dyn Outbox<Out>) -> bool {
        self.inner.complete(outbox)
    }
}

/// Lazily flat-maps one item into zero or more output items, used by
/// `MapP`/`TransformP`: each input item produces a fresh traverser that
/// must be fully drained (respecting outbox back-pressure) before the next
/// input item is pulled.
pub struct FlatMapper<Item, Out> {
    flat_map_fn: Box<dyn Fn(Item) -> Box<dyn Iterator<Item = Out>>>,
    current: Option<Box<dyn Iterator<Item = Out>>>,
}

impl<Item, Out> FlatMapper<Item, Out> {
    pub fn new(flat_map_fn: impl Fn(Item) -> Box<dyn Iterator<Item = Out>> + 'static) -> Self {
        FlatMapper { flat_map_fn: Box::new(flat_map_fn), current: None }
    }
}

/// A one-input processor that flat-maps every item through a [`FlatMapper`].
pub struct TransformP<Item, Out> {
    flat_mapper: FlatMapper<Item, Out>,
    cursor: EmitCursor<Out>,
}

impl<Item: 'static, Out: 'static> TransformP<Item, Out> {
    pub fn new(flat_map_fn: impl Fn(Item) -> Box<dyn Iterator<Item = Out>> + 'static) -> Self {
        TransformP { flat_mapper: FlatMapper::new(flat_map_fn), cursor: EmitCursor::new() }
    }

    /// `MapP` is the arity-1-output specialisation of `TransformP`: every
    /// input item maps to exactly one output item.
    pub fn map(map_fn: impl Fn(Item) -> Out + 'static) -> Self {
        TransformP::new(move |item| Box::new(std::iter::once(map_fn(item))) as Box<dyn Iterator<Item = Out>>)
    }
}

impl<Item: 'static, Out: 'static> Processor<Item, Out> for TransformP<Item, Out> {
    fn process(&mut self, _ordinal: usize, inbox: &mut dyn Inbox<Item>, outbox: &mut dyn Outbox<Out>) -> bool {
        loop {
            if self.flat_mapper.current.is_none() {
                match inbox.poll() {
                    Some(item) => self.flat_mapper.current = Some((self.flat_mapper.flat_map_fn)(item)),
                    None => return true,
                }
            }
            let traverser = self.flat_mapper.current.as_mut().unwrap();
            if !self.cursor.emit_from_traverser(outbox, Ordinal::Output(0), traverser) {
                return false;
            }
            self.flat_mapper.current = None;
        }
    }
}
