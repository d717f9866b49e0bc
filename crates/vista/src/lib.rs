#![forbid(unsafe_code)]

//! Vista public facade and prelude.
//!
//! Incremental, composable views over an observable collection. Attach
//! decorators to an [`ObservableCollection`]; every source mutation is
//! translated into the minimal change set of the decorated view.
//!
//! ```
//! use vista::prelude::*;
//!
//! let numbers = ObservableCollection::from_vec(vec![5, 3, 8, 1, 9, 2]);
//! numbers.attach(Filter::new(|x: &i32| x % 2 == 0)).unwrap();
//! numbers.attach(Sort::ascending()).unwrap();
//! assert_eq!(numbers.decorated_items().unwrap(), vec![2, 8]);
//!
//! numbers.insert(2, 4).unwrap();
//! assert_eq!(numbers.decorated_items().unwrap(), vec![2, 4, 8]);
//! ```

pub use vista_core as core;
pub use vista_pipeline as pipeline;

pub use vista_core::{
    BatchKind, ChangeArgs, ChangeKind, CollectionChange, CollectionId, CollectionLock, DecoratorId,
    IndexMap, Item, Operation, PipelineConfig, PipelineError, Result,
};
pub use vista_pipeline::decorators;
pub use vista_pipeline::{
    BatchUpdate, ChangeListener, Decorator, DecoratorContext, DecoratorHandle, Flow, ItemChangeTimer,
    Items, ObservableCollection, Subscription,
};

/// Everything needed to build and observe a decorated collection.
pub mod prelude {
    pub use crate::decorators::{
        Accumulate, Convert, Distinct, Filter, FirstLast, Flatten, Group, HeaderFooter, Limit,
        Materialize, MinMax, Sort,
    };
    pub use crate::{
        BatchKind, ChangeArgs, ChangeListener, CollectionChange, Decorator, DecoratorContext,
        DecoratorHandle, Flow, Items, ObservableCollection, PipelineConfig, PipelineError, Result,
        Subscription,
    };
}
