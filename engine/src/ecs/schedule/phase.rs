use std::any::TypeId;

/// Wrapper struct over a type ID to cleanup the schedule code by providing an opaque phase ID.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Id(TypeId);

impl Id {
    /// Construct a new ID from a label type.
    #[inline]
    pub fn new<L: Label>() -> Self {
        Self(TypeId::of::<L>())
    }
}

/// A marker trait for phase identifiers.
///
/// Phase labels are zero-sized types used to identify phases in a
/// [`Schedule`](super::Schedule). The name is used for logging only.
///
/// ```rust,ignore
/// define_phase!(Physics, Render);
///
/// let sequence = Sequence::new().then(OnUpdate).then(Physics).then(Render);
/// world.schedule_mut().set_pipeline(sequence);
/// ```
pub trait Label: 'static {
    /// Returns a human-readable name for this phase.
    fn name() -> &'static str;

    /// Get the phase ID for a label.
    fn id(self) -> Id;
}

/// Defines one or more phase label types.
///
/// For each identifier the macro generates a unit struct implementing [`Label`]:
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
/// pub struct Update;
///
/// impl Label for Update {
///     fn name() -> &'static str { "Update" }
///     fn id(self) -> Id { Id::new::<Self>() }
/// }
/// ```
#[macro_export]
macro_rules! define_phase {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
            pub struct $name;

            impl $crate::ecs::schedule::Label for $name {
                #[inline]
                fn name() -> &'static str {
                    stringify!($name)
                }

                fn id(self) -> $crate::ecs::schedule::Id {
                     $crate::ecs::schedule::Id::new::<Self>()
                }
            }
        )*
    };
}

// The builtin pipeline, in frame order. `Manual` is never part of it: systems registered there
// only run through `World::run_system`.
define_phase!(
    OnLoad, PreUpdate, OnUpdate, OnValidate, PostUpdate, PreStore, OnStore, Manual
);

/// An ordered list of phases to run for one frame.
///
/// ```rust,ignore
/// // Paused frame: skip the simulation phases
/// let paused = Sequence::new().then(OnLoad).then(OnStore);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    phases: Vec<(Id, &'static str)>,
}

impl Sequence {
    /// Creates a new empty phase sequence.
    #[inline]
    pub fn new() -> Self {
        Self { phases: Vec::new() }
    }

    /// The builtin frame: `OnLoad` through `OnStore`.
    pub fn pipeline() -> Self {
        Self::new()
            .then(OnLoad)
            .then(PreUpdate)
            .then(OnUpdate)
            .then(OnValidate)
            .then(PostUpdate)
            .then(PreStore)
            .then(OnStore)
    }

    /// Adds a phase to the end of the sequence.
    #[inline]
    pub fn then<L: Label>(mut self, label: L) -> Self {
        self.push(label);
        self
    }

    /// Adds a phase to the sequence in place.
    #[inline]
    pub fn push<L: Label>(&mut self, label: L) {
        self.phases.push((label.id(), L::name()));
    }

    /// Returns the list of phase IDs for this sequence.
    pub fn phases(&self) -> impl ExactSizeIterator<Item = Id> + '_ {
        self.phases.iter().map(|(id, _)| *id)
    }

    /// The name of the phase at `index`.
    #[inline]
    pub fn name(&self, index: usize) -> Option<&'static str> {
        self.phases.get(index).map(|(_, name)| *name)
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        self.phases.iter().any(|(phase, _)| *phase == id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }
}
