//! Exception dispatch over the clauses of one frame.
//!
//! Clauses of a [`DynamicMethod`](crate::runtime::DynamicMethod) are ordered inner-first,
//! so scanning them in order finds the innermost handler of a code index first. Dispatch is
//! a single pass: finally and fault handlers run as they are met while searching, and the
//! search resumes after them with the next clause.

use crate::{
    runtime::{
        emit::{ClauseKind, ExceptionClause},
        host::Host,
        interpreter::EvalStack,
        value::Value,
    },
    EmulationError, Error, Result, ThrownException,
};

/// Where execution resumes once the running handler code completes
#[derive(Debug)]
enum Continuation {
    /// A finally or fault handler runs while `exception` propagates
    Unwind {
        clause: usize,
        exception: Value,
        thrown_at: usize,
    },
    /// A filter decides whether its handler takes `exception`
    Filter {
        clause: usize,
        exception: Value,
        thrown_at: usize,
    },
    /// Finally handlers run on the way to a `leave` target
    Leave {
        clause: usize,
        target: usize,
        pending: Vec<usize>,
    },
}

impl Continuation {
    fn clause(&self) -> usize {
        match self {
            Continuation::Unwind { clause, .. }
            | Continuation::Filter { clause, .. }
            | Continuation::Leave { clause, .. } => *clause,
        }
    }
}

/// Handler bookkeeping of one executing frame
#[derive(Debug)]
pub(super) struct HandlerState<'m> {
    clauses: &'m [ExceptionClause],
    continuations: Vec<Continuation>,
    /// Catch handlers being executed, with the exception they caught
    caught: Vec<(usize, Value)>,
}

impl<'m> HandlerState<'m> {
    pub(super) fn new(clauses: &'m [ExceptionClause]) -> Self {
        HandlerState {
            clauses,
            continuations: Vec::new(),
            caught: Vec::new(),
        }
    }

    /// Dispatches `exception`, thrown by the instruction at `thrown_at`.
    ///
    /// # Returns
    /// The code index execution continues at.
    ///
    /// # Errors
    /// Returns [`Error::Exception`] when no handler of the frame takes the exception.
    pub(super) fn throw(
        &mut self,
        host: &Host,
        stack: &mut EvalStack,
        exception: Value,
        thrown_at: usize,
    ) -> Result<usize> {
        // An exception inside a filter rejects the filtered exception and is discarded
        let in_filter = matches!(
            self.continuations.last(),
            Some(Continuation::Filter { clause, .. }) if self.in_filter(*clause, thrown_at)
        );
        if in_filter {
            if let Some(Continuation::Filter {
                clause,
                exception: filtered,
                thrown_at: filtered_at,
            }) = self.continuations.pop()
            {
                return self.search(host, stack, filtered, filtered_at, clause + 1);
            }
        }

        self.abandon(thrown_at);
        self.search(host, stack, exception, thrown_at, 0)
    }

    /// The exception of the innermost catch handler being executed, for `rethrow`
    pub(super) fn current_exception(&self) -> Result<Value> {
        self.caught
            .last()
            .map(|(_, exception)| exception.clone())
            .ok_or_else(|| {
                EmulationError::InvalidExceptionHandler {
                    description: "rethrow outside of a catch handler".to_string(),
                }
                .into()
            })
    }

    /// Handles `leave` from `from` towards `target`, returning the next code index
    pub(super) fn leave(&mut self, stack: &mut EvalStack, from: usize, target: usize) -> usize {
        let clauses = self.clauses;
        self.caught.retain(|(clause, _)| {
            let clause = &clauses[*clause];
            !clause.handles(from) || clause.handles(target)
        });
        stack.clear();

        let mut pending: Vec<usize> = clauses
            .iter()
            .enumerate()
            .filter(|(_, clause)| {
                matches!(clause.kind, ClauseKind::Finally)
                    && clause.protects(from)
                    && !clause.protects(target)
            })
            .map(|(index, _)| index)
            .collect();
        if pending.is_empty() {
            return target;
        }

        let clause = pending.remove(0);
        self.continuations.push(Continuation::Leave {
            clause,
            target,
            pending,
        });
        clauses[clause].handler_start
    }

    /// Handles `endfinally`, returning the next code index
    ///
    /// # Errors
    /// Returns [`Error::Exception`] when the propagating exception finds no further handler.
    pub(super) fn end_finally(&mut self, host: &Host, stack: &mut EvalStack) -> Result<usize> {
        stack.clear();
        match self.continuations.pop() {
            Some(Continuation::Unwind {
                clause,
                exception,
                thrown_at,
            }) => self.search(host, stack, exception, thrown_at, clause + 1),
            Some(Continuation::Leave {
                target,
                mut pending,
                ..
            }) => {
                if pending.is_empty() {
                    return Ok(target);
                }
                let clause = pending.remove(0);
                self.continuations.push(Continuation::Leave {
                    clause,
                    target,
                    pending,
                });
                Ok(self.clauses[clause].handler_start)
            }
            other => {
                if let Some(continuation) = other {
                    self.continuations.push(continuation);
                }
                Err(EmulationError::InvalidExceptionHandler {
                    description: "endfinally outside of a finally or fault handler".to_string(),
                }
                .into())
            }
        }
    }

    /// Handles `endfilter`, returning the next code index
    ///
    /// # Errors
    /// Returns [`Error::Exception`] when a rejected exception finds no further handler.
    pub(super) fn end_filter(&mut self, host: &Host, stack: &mut EvalStack, accepted: bool) -> Result<usize> {
        let Some(Continuation::Filter {
            clause,
            exception,
            thrown_at,
        }) = self.continuations.pop()
        else {
            return Err(EmulationError::InvalidExceptionHandler {
                description: "endfilter outside of a filter".to_string(),
            }
            .into());
        };

        stack.clear();
        if accepted {
            stack.push(exception.clone())?;
            self.caught.push((clause, exception));
            return Ok(self.clauses[clause].handler_start);
        }
        self.search(host, stack, exception, thrown_at, clause + 1)
    }

    fn in_filter(&self, clause: usize, index: usize) -> bool {
        let clause = &self.clauses[clause];
        match clause.kind {
            ClauseKind::Filter { filter_start } => filter_start <= index && index < clause.handler_start,
            _ => false,
        }
    }

    /// Drops the handler code a throw at `index` leaves
    fn abandon(&mut self, index: usize) {
        while let Some(continuation) = self.continuations.last() {
            let inside = match continuation {
                Continuation::Filter { clause, .. } => self.in_filter(*clause, index),
                other => self.clauses[other.clause()].handles(index),
            };
            if !inside {
                break;
            }
            self.continuations.pop();
        }

        let clauses = self.clauses;
        self.caught.retain(|(clause, _)| !clauses[*clause].handles(index));
    }

    fn search(
        &mut self,
        host: &Host,
        stack: &mut EvalStack,
        exception: Value,
        thrown_at: usize,
        first: usize,
    ) -> Result<usize> {
        let clauses = self.clauses;
        for (index, clause) in clauses.iter().enumerate().skip(first) {
            if !clause.protects(thrown_at) {
                continue;
            }
            match &clause.kind {
                ClauseKind::Catch(catch_type) => {
                    let matches = match catch_type {
                        Some(catch_type) => host.is_instance_of(&exception, catch_type)?,
                        None => true,
                    };
                    if matches {
                        stack.clear();
                        stack.push(exception.clone())?;
                        self.caught.push((index, exception));
                        return Ok(clause.handler_start);
                    }
                }
                ClauseKind::Filter { filter_start } => {
                    stack.clear();
                    stack.push(exception.clone())?;
                    self.continuations.push(Continuation::Filter {
                        clause: index,
                        exception,
                        thrown_at,
                    });
                    return Ok(*filter_start);
                }
                ClauseKind::Finally | ClauseKind::Fault => {
                    stack.clear();
                    self.continuations.push(Continuation::Unwind {
                        clause: index,
                        exception,
                        thrown_at,
                    });
                    return Ok(clause.handler_start);
                }
            }
        }
        Err(Error::Exception(ThrownException(exception)))
    }
}
