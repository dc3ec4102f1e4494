//! The aggregate-operation algebra: `create`/`accumulate`/`combine`/`deduct`/`export`/`finish`,
//! and the combinators that build composite operations out of simpler ones.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::numeric::LongAccumulator;
use crate::tuple::{Tag, Tuple2, Tuple3};

/// A reusable aggregation, parameterized by its mutable accumulator type
/// `Acc`, the stream item type it consumes, and the result type it produces.
///
/// `deduct` is optional: it lets a sliding-window aggregation remove an
/// expired frame's contribution from a running accumulator instead of
/// recomputing from scratch, but not every aggregation supports it (e.g.
/// `min`/`max` do not, because removing an element may require rescanning).
pub struct AggregateOperation<Acc, Item, Res> {
    create_fn: Rc<dyn Fn() -> Acc>,
    accumulate_fn: Rc<dyn Fn(&mut Acc, &Item)>,
    combine_fn: Rc<dyn Fn(&mut Acc, &Acc)>,
    deduct_fn: Option<Rc<dyn Fn(&mut Acc, &Acc)>>,
    export_fn: Rc<dyn Fn(&Acc) -> Res>,
    finish_fn: Rc<dyn Fn(&mut Acc) -> Res>,
}

impl<Acc, Item, Res> Clone for AggregateOperation<Acc, Item, Res> {
    fn clone(&self) -> Self {
        AggregateOperation {
            create_fn: self.create_fn.clone(),
            accumulate_fn: self.accumulate_fn.clone(),
            combine_fn: self.combine_fn.clone(),
            deduct_fn: self.deduct_fn.clone(),
            export_fn: self.export_fn.clone(),
            finish_fn: self.finish_fn.clone(),
        }
    }
}

impl<Acc: 'static, Item: 'static, Res: 'static> AggregateOperation<Acc, Item, Res> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        create_fn: impl Fn() -> Acc + 'static,
        accumulate_fn: impl Fn(&mut Acc, &Item) + 'static,
        combine_fn: impl Fn(&mut Acc, &Acc) + 'static,
        deduct_fn: Option<Box<dyn Fn(&mut Acc, &Acc)>>,
        export_fn: impl Fn(&Acc) -> Res + 'static,
        finish_fn: impl Fn(&mut Acc) -> Res + 'static,
    ) -> Self {
        AggregateOperation {
            create_fn: Rc::new(create_fn),
            accumulate_fn: Rc::new(accumulate_fn),
            combine_fn: Rc::new(combine_fn),
            deduct_fn: deduct_fn.map(|f| Rc::from(f)),
            export_fn: Rc::new(export_fn),
            finish_fn: Rc::new(finish_fn),
        }
    }

    pub fn create(&self) -> Acc {
        (self.create_fn)()
    }

    pub fn accumulate(&self, acc: &mut Acc, item: &Item) {
        (self.accumulate_fn)(acc, item)
    }

    pub fn combine(&self, acc: &mut Acc, other: &Acc) {
        (self.combine_fn)(acc, other)
    }

    pub fn has_deduct(&self) -> bool {
        self.deduct_fn.is_some()
    }

    /// Panics if this operation has no deduct function; check [`Self::has_deduct`] first.
    pub fn deduct(&self, acc: &mut Acc, other: &Acc) {
        (self.deduct_fn.as_ref().expect("operation has no deduct function"))(acc, other)
    }

    pub fn export(&self, acc: &Acc) -> Res {
        (self.export_fn)(acc)
    }

    /// Like [`Self::export`], but may reset or otherwise destructively
    /// finalize the accumulator; the runtime calls this instead of `export`
    /// when the accumulator will not be read from again.
    pub fn finish(&self, acc: &mut Acc) -> Res {
        (self.finish_fn)(acc)
    }

    /// Post-processes both `export` and `finish` results through `map_fn`,
    /// leaving accumulation untouched. `and_then(|r| r)` is the identity.
    pub fn and_then<Res2: 'static>(self, map_fn: impl Fn(Res) -> Res2 + 'static) -> AggregateOperation<Acc, Item, Res2> {
        let map_fn = Rc::new(map_fn);
        let map_for_export = map_fn.clone();
        let export_fn = self.export_fn.clone();
        let map_for_finish = map_fn;
        let finish_fn = self.finish_fn.clone();
        AggregateOperation {
            create_fn: self.create_fn,
            accumulate_fn: self.accumulate_fn,
            combine_fn: self.combine_fn,
            deduct_fn: self.deduct_fn,
            export_fn: Rc::new(move |acc: &Acc| (map_for_export)((export_fn)(acc))),
            finish_fn: Rc::new(move |acc: &mut Acc| (map_for_finish)((finish_fn)(acc))),
        }
    }

    /// Replaces the accumulate step with the combine step driven through
    /// `get_acc_fn`, so the resulting operation accumulates
    /// *already-combined partial accumulators* (extracted from a stage-2 item
    /// via `get_acc_fn`) rather than raw items. This is how a two-stage
    /// aggregation is built: stage one runs the original operation
    /// per-partition, stage two runs the combining-accumulate variant over
    /// the partial results. Passing the identity function recovers the case
    /// where stage-2 items already *are* the raw accumulator.
    pub fn with_combining_accumulate_fn<Item2: 'static>(
        self,
        get_acc_fn: impl Fn(&Item2) -> &Acc + 'static,
    ) -> AggregateOperation<Acc, Item2, Res> {
        let combine_fn = self.combine_fn.clone();
        let get_acc_fn = Rc::new(get_acc_fn);
        AggregateOperation {
            create_fn: self.create_fn,
            accumulate_fn: Rc::new(move |acc: &mut Acc, item: &Item2| (combine_fn)(acc, (get_acc_fn)(item))),
            combine_fn: self.combine_fn,
            deduct_fn: self.deduct_fn,
            export_fn: self.export_fn,
            finish_fn: self.finish_fn,
        }
    }
}

/// Counts items. Uses wrapping (not saturating) arithmetic: a counter that
/// overflows past `i64::MAX` wraps to `i64::MIN`, matching the behavior of
/// an ordinary unchecked counter rather than pinning at the maximum.
pub fn counting<Item: 'static>() -> AggregateOperation<LongAccumulator, Item, i64> {
    AggregateOperation::new(
        LongAccumulator::default,
        |acc: &mut LongAccumulator, _item: &Item| acc.add(1),
        |acc: &mut LongAccumulator, other: &LongAccumulator| acc.add(other.get()),
        Some(Box::new(|acc: &mut LongAccumulator, other: &LongAccumulator| acc.subtract(other.get()))),
        |acc: &LongAccumulator| acc.get(),
        |acc: &mut LongAccumulator| acc.get(),
    )
}

/// Runs two aggregations over the same item stream side by side, producing
/// a `Tuple2` accumulator and a `Tuple2` result. Supports `deduct` only if
/// both inputs do.
pub fn aggregate_operation2<Acc1: 'static, Acc2: 'static, Item: 'static, Res1: 'static, Res2: 'static>(
    op1: AggregateOperation<Acc1, Item, Res1>,
    op2: AggregateOperation<Acc2, Item, Res2>,
) -> AggregateOperation<Tuple2<Acc1, Acc2>, Item, Tuple2<Res1, Res2>> {
    let deduct_fn: Option<Box<dyn Fn(&mut Tuple2<Acc1, Acc2>, &Tuple2<Acc1, Acc2>)>> =
        if op1.has_deduct() && op2.has_deduct() {
            let op1 = op1.clone();
            let op2 = op2.clone();
            Some(Box::new(move |acc: &mut Tuple2<Acc1, Acc2>, other: &Tuple2<Acc1, Acc2>| {
                op1.deduct(&mut acc.f0, &other.f0);
                op2.deduct(&mut acc.f1, &other.f1);
            }))
        } else {
            None
        };

    let create1 = op1.clone();
    let create2 = op2.clone();
    let accumulate1 = op1.clone();
    let accumulate2 = op2.clone();
    let combine1 = op1.clone();
    let combine2 = op2.clone();
    let export1 = op1.clone();
    let export2 = op2.clone();
    let finish1 = op1;
    let finish2 = op2;

    AggregateOperation::new(
        move || Tuple2::new(create1.create(), create2.create()),
        move |acc: &mut Tuple2<Acc1, Acc2>, item: &Item| {
            accumulate1.accumulate(&mut acc.f0, item);
            accumulate2.accumulate(&mut acc.f1, item);
        },
        move |acc: &mut Tuple2<Acc1, Acc2>, other: &Tuple2<Acc1, Acc2>| {
            combine1.combine(&mut acc.f0, &other.f0);
            combine2.combine(&mut acc.f1, &other.f1);
        },
        deduct_fn,
        move |acc: &Tuple2<Acc1, Acc2>| Tuple2::new(export1.export(&acc.f0), export2.export(&acc.f1)),
        move |acc: &mut Tuple2<Acc1, Acc2>| Tuple2::new(finish1.finish(&mut acc.f0), finish2.finish(&mut acc.f1)),
    )
}

/// Three-way analogue of [`aggregate_operation2`].
pub fn aggregate_operation3<
    Acc1: 'static,
    Acc2: 'static,
    Acc3: 'static,
    Item: 'static,
    Res1: 'static,
    Res2: 'static,
    Res3: 'static,
>(
    op1: AggregateOperation<Acc1, Item, Res1>,
    op2: AggregateOperation<Acc2, Item, Res2>,
    op3: AggregateOperation<Acc3, Item, Res3>,
) -> AggregateOperation<Tuple3<Acc1, Acc2, Acc3>, Item, Tuple3<Res1, Res2, Res3>> {
    let deduct_fn: Option<Box<dyn Fn(&mut Tuple3<Acc1, Acc2, Acc3>, &Tuple3<Acc1, Acc2, Acc3>)>> =
        if op1.has_deduct() && op2.has_deduct() && op3.has_deduct() {
            let op1 = op1.clone();
            let op2 = op2.clone();
            let op3 = op3.clone();
            Some(Box::new(move |acc: &mut Tuple3<Acc1, Acc2, Acc3>, other: &Tuple3<Acc1, Acc2, Acc3>| {
                op1.deduct(&mut acc.f0, &other.f0);
                op2.deduct(&mut acc.f1, &other.f1);
                op3.deduct(&mut acc.f2, &other.f2);
            }))
        } else {
            None
        };

    let create1 = op1.clone();
    let create2 = op2.clone();
    let create3 = op3.clone();
    let accumulate1 = op1.clone();
    let accumulate2 = op2.clone();
    let accumulate3 = op3.clone();
    let combine1 = op1.clone();
    let combine2 = op2.clone();
    let combine3 = op3.clone();
    let export1 = op1.clone();
    let export2 = op2.clone();
    let export3 = op3.clone();
    let finish1 = op1;
    let finish2 = op2;
    let finish3 = op3;

    AggregateOperation::new(
        move || Tuple3::new(create1.create(), create2.create(), create3.create()),
        move |acc: &mut Tuple3<Acc1, Acc2, Acc3>, item: &Item| {
            accumulate1.accumulate(&mut acc.f0, item);
            accumulate2.accumulate(&mut acc.f1, item);
            accumulate3.accumulate(&mut acc.f2, item);
        },
        move |acc: &mut Tuple3<Acc1, Acc2, Acc3>, other: &Tuple3<Acc1, Acc2, Acc3>| {
            combine1.combine(&mut acc.f0, &other.f0);
            combine2.combine(&mut acc.f1, &other.f1);
            combine3.combine(&mut acc.f2, &other.f2);
        },
        deduct_fn,
        move |acc: &Tuple3<Acc1, Acc2, Acc3>| {
            Tuple3::new(export1.export(&acc.f0), export2.export(&acc.f1), export3.export(&acc.f2))
        },
        move |acc: &mut Tuple3<Acc1, Acc2, Acc3>| {
            Tuple3::new(finish1.finish(&mut acc.f0), finish2.finish(&mut acc.f1), finish3.finish(&mut acc.f2))
        },
    )
}

type AnyAcc = Box<dyn Any>;

/// Builds a variable-arity aggregation keyed by [`Tag`], for pipelines that
/// compose an aggregation from a number of sub-operations not known until
/// runtime. Each slot's accumulator and result type is erased behind `Any`;
/// retrieve a slot's result with [`tagged_result`].
pub struct VarArityBuilder<Item> {
    slots: Vec<(Tag, AggregateOperation<AnyAcc, Item, AnyAcc>)>,
}

impl<Item: 'static> VarArityBuilder<Item> {
    pub fn new() -> Self {
        VarArityBuilder { slots: Vec::new() }
    }

    /// Registers `op` under `tag`. `tag` must not already be in use.
    pub fn add<Acc: 'static, Res: 'static>(mut self, tag: Tag, op: AggregateOperation<Acc, Item, Res>) -> Self {
        assert!(self.slots.iter().all(|(t, _)| *t != tag), "tag already registered");
        let create = op.clone();
        let accumulate = op.clone();
        let combine = op.clone();
        let deduct_supported = op.has_deduct();
        let deduct = op.clone();
        let export = op.clone();
        let finish = op;

        let deduct_fn: Option<Box<dyn Fn(&mut AnyAcc, &AnyAcc)>> = if deduct_supported {
            Some(Box::new(move |acc: &mut AnyAcc, other: &AnyAcc| {
                deduct.deduct(
                    acc.downcast_mut::<Acc>().expect("accumulator type mismatch for tag"),
                    other.downcast_ref::<Acc>().expect("accumulator type mismatch for tag"),
                )
            }))
        } else {
            None
        };

        let erased = AggregateOperation::new(
            move || -> AnyAcc { Box::new(create.create()) },
            move |acc: &mut AnyAcc, item: &Item| {
                accumulate.accumulate(acc.downcast_mut::<Acc>().expect("accumulator type mismatch for tag"), item)
            },
            move |acc: &mut AnyAcc, other: &AnyAcc| {
                combine.combine(
                    acc.downcast_mut::<Acc>().expect("accumulator type mismatch for tag"),
                    other.downcast_ref::<Acc>().expect("accumulator type mismatch for tag"),
                )
            },
            deduct_fn,
            move |acc: &AnyAcc| -> AnyAcc {
                Box::new(export.export(acc.downcast_ref::<Acc>().expect("accumulator type mismatch for tag")))
            },
            move |acc: &mut AnyAcc| -> AnyAcc {
                Box::new(finish.finish(acc.downcast_mut::<Acc>().expect("accumulator type mismatch for tag")))
            },
        );
        self.slots.push((tag, erased));
        self
    }

    /// Finishes the builder into a single composite operation whose
    /// accumulator and result are `HashMap<Tag, Box<dyn Any>>`.
    pub fn build(self) -> AggregateOperation<HashMap<Tag, AnyAcc>, Item, HashMap<Tag, AnyAcc>> {
        let slots = Rc::new(self.slots);
        let create_slots = slots.clone();
        let accumulate_slots = slots.clone();
        let combine_slots = slots.clone();
        let export_slots = slots.clone();
        let finish_slots = slots;

        AggregateOperation::new(
            move || create_slots.iter().map(|(tag, op)| (*tag, op.create())).collect(),
            move |acc: &mut HashMap<Tag, AnyAcc>, item: &Item| {
                for (tag, op) in accumulate_slots.iter() {
                    op.accumulate(acc.get_mut(tag).expect("slot present since create() populated every tag"), item);
                }
            },
            move |acc: &mut HashMap<Tag, AnyAcc>, other: &HashMap<Tag, AnyAcc>| {
                for (tag, op) in combine_slots.iter() {
                    op.combine(acc.get_mut(tag).unwrap(), other.get(tag).unwrap());
                }
            },
            None,
            move |acc: &HashMap<Tag, AnyAcc>| {
                export_slots.iter().map(|(tag, op)| (*tag, op.export(acc.get(tag).unwrap()))).collect()
            },
            move |acc: &mut HashMap<Tag, AnyAcc>| {
                finish_slots.iter().map(|(tag, op)| (*tag, op.finish(acc.get_mut(tag).unwrap()))).collect()
            },
        )
    }
}

impl<Item: 'static> Default for VarArityBuilder<Item> {
    fn default() -> Self {
        Self::new()
    }
}

/// Downcasts a [`VarArityBuilder::build`] result slot back to its concrete type.
pub fn tagged_result<Res: 'static>(results: &HashMap<Tag, AnyAcc>, tag: Tag) -> &Res {
    results
        .get(&tag)
        .expect("tag not present in result map")
        .downcast_ref::<Res>()
        .expect("result type mismatch for tag")
}
