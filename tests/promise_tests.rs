//! Integration tests for promises and combinators

mod common;

use common::{handler, new_loop, strings, Log};
use mercury::prelude::*;
use pretty_assertions::assert_eq;

mod settlement {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_settle_once() {
        let event_loop = new_loop();
        let log = Log::new();
        let promise = Promise::new(&event_loop, |resolve, reject| {
            resolve.call(&[Value::from(1)])?;
            reject.call(&[Value::from("late")])?;
            resolve.call(&[Value::from(2)])?;
            Ok(())
        });
        promise.then(Some(log.value_recorder("ok")), Some(log.value_recorder("err")));

        event_loop.run().unwrap();
        assert_eq!(promise.state(), PromiseState::Fulfilled);
        assert_eq!(log.entries(), strings(&["ok:1"]));
    }

    #[test]
    fn test_executor_throw_after_resolve_is_ignored() {
        let event_loop = new_loop();
        let promise = Promise::new(&event_loop, |resolve, _| {
            resolve.call(&[Value::from("kept")])?;
            Err(Error::thrown("ignored"))
        });
        assert_eq!(event_loop.run_until_settled(&promise).unwrap(), Value::from("kept"));
    }

    #[test]
    fn test_reactions_fire_in_registration_order() {
        let event_loop = new_loop();
        let log = Log::new();
        let resolvers = Promise::with_resolvers(&event_loop);
        resolvers.promise.then(Some(log.recorder("a")), None);
        resolvers.promise.then(Some(log.recorder("b")), None);
        resolvers.promise.then(Some(log.recorder("c")), None);

        resolvers.resolve.call(&[Value::Undefined]).unwrap();
        assert!(log.entries().is_empty());
        event_loop.run().unwrap();
        assert_eq!(log.entries(), strings(&["a", "b", "c"]));
    }

    #[test]
    fn test_then_on_settled_promise_is_never_synchronous() {
        let event_loop = new_loop();
        let log = Log::new();
        let promise = Promise::resolved(&event_loop, Value::from(1));
        promise.then(Some(log.recorder("handler")), None);
        log.push("after then");

        event_loop.run().unwrap();
        assert_eq!(log.entries(), strings(&["after then", "handler"]));
    }

    #[test]
    fn test_handler_error_rejects_derived() {
        let event_loop = new_loop();
        let derived = Promise::resolved(&event_loop, Value::from(1))
            .then(Some(handler(|_| Err(Error::thrown("boom")))), None);

        let err = event_loop.run_until_settled(&derived).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("boom")));
    }

    #[test]
    fn test_missing_handlers_pass_through() {
        let event_loop = new_loop();
        let fulfilled = Promise::resolved(&event_loop, Value::from(7)).then(None, None);
        let rejected = Promise::rejected(&event_loop, Value::from("no")).then(None, None);

        assert_eq!(event_loop.run_until_settled(&fulfilled).unwrap(), Value::from(7));
        let err = event_loop.run_until_settled(&rejected).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("no")));
    }

    #[test]
    fn test_catch_recovers() {
        let event_loop = new_loop();
        let recovered = Promise::rejected(&event_loop, Value::from("bad"))
            .catch(handler(|reason| Ok(Value::from(format!("recovered from {}", reason)))));

        assert_eq!(
            event_loop.run_until_settled(&recovered).unwrap(),
            Value::from("recovered from bad")
        );
    }
}

mod adoption {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolved_of_promise_is_flattened() {
        let event_loop = new_loop();
        let inner = Promise::resolved(&event_loop, Value::from("x"));
        let outer = Promise::resolved(&event_loop, Value::Promise(inner.clone()));
        assert!(outer.ptr_eq(&inner));
        assert_eq!(event_loop.run_until_settled(&outer).unwrap(), Value::from("x"));
    }

    #[test]
    fn test_resolve_with_pending_promise_adopts_eventual_value() {
        let event_loop = new_loop();
        let inner = Promise::with_resolvers(&event_loop);
        let outer = Promise::deferred(&event_loop);
        outer.resolve(Value::Promise(inner.promise.clone()));

        event_loop.run().unwrap();
        assert!(outer.promise().is_pending());

        inner.resolve.call(&[Value::from(3)]).unwrap();
        assert_eq!(event_loop.run_until_settled(outer.promise()).unwrap(), Value::from(3));
    }

    #[test]
    fn test_handler_returning_promise_is_flattened() {
        let event_loop = new_loop();
        let el = event_loop.clone();
        let derived = Promise::resolved(&event_loop, Value::from(1)).then(
            Some(handler(move |_| Ok(Value::Promise(Promise::resolved(&el, Value::from("nested")))))),
            None,
        );
        assert_eq!(event_loop.run_until_settled(&derived).unwrap(), Value::from("nested"));
    }

    #[test]
    fn test_adoption_costs_two_extra_ticks() {
        let event_loop = new_loop();
        let log = Log::new();

        let adopted = Promise::new(&event_loop, |resolve, _| {
            resolve.call(&[Value::Promise(Promise::resolved(&event_loop, Value::Undefined))])?;
            Ok(())
        });
        adopted.then(Some(log.recorder("A")), None);

        Promise::resolved(&event_loop, Value::Undefined)
            .then(Some(log.recorder("1")), None)
            .then(Some(log.recorder("2")), None)
            .then(Some(log.recorder("3")), None);

        event_loop.run().unwrap();
        assert_eq!(log.entries(), strings(&["1", "2", "A", "3"]));
    }

    #[test]
    fn test_foreign_thenable_is_adopted() {
        let event_loop = new_loop();
        let thenable = Value::new_object();
        thenable.set_property(
            "then",
            Value::function("then", |args| {
                if let Some(resolve) = args.first().and_then(Value::as_function) {
                    resolve.call(&[Value::from("from thenable")])?;
                }
                Ok(Value::Undefined)
            }),
        );

        let promise = Promise::resolved(&event_loop, thenable);
        assert_eq!(
            event_loop.run_until_settled(&promise).unwrap(),
            Value::from("from thenable")
        );
    }

    #[test]
    fn test_throwing_thenable_rejects() {
        let event_loop = new_loop();
        let thenable = Value::new_object();
        thenable.set_property("then", Value::function("then", |_| Err(Error::thrown("then failed"))));

        let promise = Promise::resolved(&event_loop, thenable);
        let err = event_loop.run_until_settled(&promise).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("then failed")));
    }

    #[test]
    fn test_chaining_cycle_is_type_error() {
        let event_loop = new_loop();
        let slot: std::rc::Rc<std::cell::RefCell<Option<Promise>>> = Default::default();
        let s = slot.clone();
        let derived = Promise::resolved(&event_loop, Value::Undefined).then(
            Some(handler(move |_| Ok(s.borrow().clone().map(Value::Promise).unwrap_or(Value::Undefined)))),
            None,
        );
        *slot.borrow_mut() = Some(derived.clone());

        let err = event_loop.run_until_settled(&derived).unwrap_err();
        let reason = err.thrown_value().cloned().unwrap();
        assert_eq!(reason.get("name"), Value::from("TypeError"));
        assert_eq!(reason.get("message"), Value::from(mercury::messages::CHAINING_CYCLE));
        slot.borrow_mut().take();
    }
}

mod finally {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_finally_keeps_fulfillment() {
        let event_loop = new_loop();
        let log = Log::new();
        let promise = Promise::resolved(&event_loop, Value::from(1)).finally(log.recorder("cleanup"));

        assert_eq!(event_loop.run_until_settled(&promise).unwrap(), Value::from(1));
        assert_eq!(log.entries(), strings(&["cleanup"]));
    }

    #[test]
    fn test_finally_receives_no_arguments() {
        let event_loop = new_loop();
        let args_seen = std::rc::Rc::new(std::cell::Cell::new(usize::MAX));
        let seen = args_seen.clone();
        let promise = Promise::resolved(&event_loop, Value::from(1)).finally(Function::new(
            "onFinally",
            move |args| {
                seen.set(args.len());
                Ok(Value::Undefined)
            },
        ));

        event_loop.run_until_settled(&promise).unwrap();
        assert_eq!(args_seen.get(), 0);
    }

    #[test]
    fn test_finally_keeps_rejection() {
        let event_loop = new_loop();
        let promise = Promise::rejected(&event_loop, Value::from("original"))
            .finally(handler(|_| Ok(Value::from("ignored"))));

        let err = event_loop.run_until_settled(&promise).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("original")));
    }

    #[test]
    fn test_finally_throw_overrides() {
        let event_loop = new_loop();
        let promise = Promise::resolved(&event_loop, Value::from(1))
            .finally(handler(|_| Err(Error::thrown("cleanup failed"))));

        let err = event_loop.run_until_settled(&promise).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("cleanup failed")));
    }

    #[test]
    fn test_finally_rejected_promise_overrides() {
        let event_loop = new_loop();
        let el = event_loop.clone();
        let promise = Promise::resolved(&event_loop, Value::from(1)).finally(handler(move |_| {
            Ok(Value::Promise(Promise::rejected(&el, Value::from("async cleanup failed"))))
        }));

        let err = event_loop.run_until_settled(&promise).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("async cleanup failed")));
    }
}

mod combinators {
    use super::*;
    use pretty_assertions::assert_eq;

    fn errors_of(reason: &Value) -> Value {
        reason.get("errors")
    }

    #[test]
    fn test_all_fulfills_in_input_order() {
        let event_loop = new_loop();
        let first = Promise::with_resolvers(&event_loop);
        let second = Promise::with_resolvers(&event_loop);
        let all = Promise::all(
            &event_loop,
            vec![
                Value::Promise(first.promise.clone()),
                Value::Promise(second.promise.clone()),
                Value::from(3),
            ],
        );

        second.resolve.call(&[Value::from(2)]).unwrap();
        event_loop.run().unwrap();
        first.resolve.call(&[Value::from(1)]).unwrap();

        assert_eq!(
            event_loop.run_until_settled(&all).unwrap(),
            Value::new_array(vec![Value::from(1), Value::from(2), Value::from(3)])
        );
    }

    #[test]
    fn test_all_rejects_with_first_rejection_even_after_other_fulfills() {
        let event_loop = new_loop();
        let p1 = Promise::with_resolvers(&event_loop);
        let p2 = Promise::with_resolvers(&event_loop);
        let all = Promise::all(
            &event_loop,
            vec![Value::Promise(p1.promise.clone()), Value::Promise(p2.promise.clone())],
        );

        p2.resolve.call(&[Value::from("p2 value")]).unwrap();
        event_loop.run().unwrap();
        p1.reject.call(&[Value::from("p1 reason")]).unwrap();

        let err = event_loop.run_until_settled(&all).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("p1 reason")));
    }

    #[test]
    fn test_all_empty() {
        let event_loop = new_loop();
        let all = Promise::all(&event_loop, Vec::new());
        assert_eq!(event_loop.run_until_settled(&all).unwrap(), Value::new_array(Vec::new()));
    }

    #[test]
    fn test_race_first_settlement_wins() {
        let event_loop = new_loop();
        let slow = Promise::with_resolvers(&event_loop);
        let fast = Promise::with_resolvers(&event_loop);
        let race = Promise::race(
            &event_loop,
            vec![Value::Promise(slow.promise.clone()), Value::Promise(fast.promise.clone())],
        );

        fast.reject.call(&[Value::from("fast failure")]).unwrap();
        slow.resolve.call(&[Value::from("slow success")]).unwrap();

        let err = event_loop.run_until_settled(&race).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("fast failure")));
    }

    #[test]
    fn test_race_empty_never_settles() {
        let event_loop = new_loop();
        let race = Promise::race(&event_loop, Vec::new());
        let err = event_loop.run_until_settled(&race).unwrap_err();
        assert!(matches!(err, Error::Unsettled));
    }

    #[test]
    fn test_any_skips_rejections() {
        let event_loop = new_loop();
        let any = Promise::any(
            &event_loop,
            vec![
                Value::Promise(Promise::rejected(&event_loop, Value::from("e1"))),
                Value::Promise(Promise::resolved(&event_loop, Value::from(5))),
            ],
        );
        assert_eq!(event_loop.run_until_settled(&any).unwrap(), Value::from(5));
    }

    #[test]
    fn test_any_all_rejected_keeps_input_order() {
        let event_loop = new_loop();
        let p1 = Promise::with_resolvers(&event_loop);
        let p2 = Promise::with_resolvers(&event_loop);
        let any = Promise::any(
            &event_loop,
            vec![Value::Promise(p1.promise.clone()), Value::Promise(p2.promise.clone())],
        );

        p2.reject.call(&[Value::from("e2")]).unwrap();
        event_loop.run().unwrap();
        p1.reject.call(&[Value::from("e1")]).unwrap();

        let err = event_loop.run_until_settled(&any).unwrap_err();
        let reason = err.thrown_value().cloned().unwrap();
        assert_eq!(reason.get("name"), Value::from("AggregateError"));
        assert_eq!(
            errors_of(&reason),
            Value::new_array(vec![Value::from("e1"), Value::from("e2")])
        );
    }

    #[test]
    fn test_any_empty_rejects() {
        let event_loop = new_loop();
        let any = Promise::any(&event_loop, Vec::new());
        let err = event_loop.run_until_settled(&any).unwrap_err();
        let reason = err.thrown_value().cloned().unwrap();
        assert_eq!(errors_of(&reason), Value::new_array(Vec::new()));
    }

    #[test]
    fn test_all_settled_never_rejects() {
        let event_loop = new_loop();
        let settled = Promise::all_settled(
            &event_loop,
            vec![
                Value::Promise(Promise::rejected(&event_loop, Value::from("no"))),
                Value::from(1),
            ],
        );

        let result = event_loop.run_until_settled(&settled).unwrap();
        let records = result.array_elements().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("status"), Value::from("rejected"));
        assert_eq!(records[0].get("reason"), Value::from("no"));
        assert_eq!(records[1].get("status"), Value::from("fulfilled"));
        assert_eq!(records[1].get("value"), Value::from(1));
    }

    #[test]
    fn test_with_resolvers_settles_once() {
        let event_loop = new_loop();
        let resolvers = Promise::with_resolvers(&event_loop);
        resolvers.reject.call(&[Value::from("first")]).unwrap();
        resolvers.resolve.call(&[Value::from("second")]).unwrap();

        let err = event_loop.run_until_settled(&resolvers.promise).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::from("first")));
    }
}

mod rejection_tracking {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unhandled_rejection_reported_at_idle() {
        let event_loop = new_loop();
        let promise = Promise::rejected(&event_loop, Value::from("nobody listens"));
        event_loop.run().unwrap();

        let reports = event_loop.take_unhandled_rejections();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].promise.ptr_eq(&promise));
        assert_eq!(reports[0].reason, Value::from("nobody listens"));
        assert_eq!(event_loop.stats().unhandled_rejections, 1);
        assert!(event_loop.take_unhandled_rejections().is_empty());
    }

    #[test]
    fn test_handler_attached_before_idle_is_not_reported() {
        let event_loop = new_loop();
        let log = Log::new();
        let promise = Promise::rejected(&event_loop, Value::from("handled"));
        promise.catch(log.value_recorder("caught"));

        event_loop.run().unwrap();
        assert_eq!(log.entries(), strings(&["caught:handled"]));
        assert!(event_loop.take_unhandled_rejections().is_empty());
    }

    #[test]
    fn test_rejection_surfaces_through_chain_end() {
        let event_loop = new_loop();
        let tail = Promise::rejected(&event_loop, Value::from("deep"))
            .then(Some(handler(Ok)), None)
            .then(Some(handler(Ok)), None);
        event_loop.run().unwrap();

        let reports = event_loop.take_unhandled_rejections();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].promise.ptr_eq(&tail));
    }

    #[test]
    fn test_run_until_settled_counts_as_handling() {
        let event_loop = new_loop();
        let promise = Promise::rejected(&event_loop, Value::from("observed"));
        assert!(event_loop.run_until_settled(&promise).is_err());
        assert!(event_loop.take_unhandled_rejections().is_empty());
    }
}
