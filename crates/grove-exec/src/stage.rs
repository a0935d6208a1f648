//! Type-erased pipeline stages.

use grove_common::{GroveError, Result};
use std::any::{type_name, Any};
use std::marker::PhantomData;

/// Owned opaque value handed between adjacent stages.
pub type BoxedItem = Box<dyn Any + Send>;

/// One transformation step of a pipeline.
///
/// Intermediates cross the stage boundary as owned opaque boxes; only
/// adjacent stages must agree on the concrete type inside, and there is no
/// cross-stage static check. A mismatch surfaces as a
/// [`GroveError::StageInput`] fault when the receiving stage unwraps its
/// input.
pub trait Stage: Send {
    /// Consumes an owned input box and produces the output box, or `None`
    /// when the stage ends the line for this item.
    fn process(&mut self, input: BoxedItem) -> Result<Option<BoxedItem>>;
}

/// Stage adapter around a closure from `I` to `O`.
pub struct Transform<I, O, F> {
    func: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F> Transform<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _types: PhantomData,
        }
    }
}

impl<I, O, F> Stage for Transform<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnMut(I) -> O + Send,
{
    fn process(&mut self, input: BoxedItem) -> Result<Option<BoxedItem>> {
        let input = input.downcast::<I>().map_err(|_| GroveError::StageInput {
            expected: type_name::<I>(),
        })?;
        Ok(Some(Box::new((self.func)(*input))))
    }
}

/// Final-position stage adapter that consumes items without producing output.
pub struct Sink<I, F> {
    func: F,
    _types: PhantomData<fn(I)>,
}

impl<I, F> Sink<I, F>
where
    I: Send + 'static,
    F: FnMut(I) + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _types: PhantomData,
        }
    }
}

impl<I, F> Stage for Sink<I, F>
where
    I: Send + 'static,
    F: FnMut(I) + Send,
{
    fn process(&mut self, input: BoxedItem) -> Result<Option<BoxedItem>> {
        let input = input.downcast::<I>().map_err(|_| GroveError::StageInput {
            expected: type_name::<I>(),
        })?;
        (self.func)(*input);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_boxes_output() {
        let mut stage = Transform::new(|n: i32| n * 2);
        let output = stage.process(Box::new(21)).unwrap().unwrap();
        assert_eq!(*output.downcast::<i32>().unwrap(), 42);
    }

    #[test]
    fn test_transform_rejects_wrong_input_type() {
        let mut stage = Transform::new(|n: i32| n * 2);
        let err = stage.process(Box::new("nope".to_string())).unwrap_err();
        assert!(matches!(err, GroveError::StageInput { expected: "i32" }));
    }

    #[test]
    fn test_sink_produces_no_output() {
        let mut seen = Vec::new();
        {
            let mut stage = Sink::new(|s: &'static str| seen.push(s));
            assert!(stage.process(Box::new("a")).unwrap().is_none());
            assert!(stage.process(Box::new("b")).unwrap().is_none());
        }
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_stateful_transform() {
        let mut running_total = 0;
        let mut stage = Transform::new(move |n: i32| {
            running_total += n;
            running_total
        });
        assert_eq!(
            *stage.process(Box::new(3)).unwrap().unwrap().downcast::<i32>().unwrap(),
            3
        );
        assert_eq!(
            *stage.process(Box::new(4)).unwrap().unwrap().downcast::<i32>().unwrap(),
            7
        );
    }
}
