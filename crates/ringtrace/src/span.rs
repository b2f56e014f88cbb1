use crate::clock::Clock;
use crate::config::TraceConfig;
use crate::sample::SampleSite;
use crate::storage::SampleStorage;

/// Scope-bound span producer.
///
/// Records the enter sample on construction and the exit sample when
/// dropped, which covers early returns and unwinding: the only way to get
/// an enter with no exit is for the process to die inside the scope, and
/// snapshot consumers tolerate that.
///
/// Constructed by the [`span!`] macro, which provides the two static sites.
///
/// [`span!`]: crate::span!
pub struct SpanGuard<'a, S, C>
where
    C: Clock,
    S: SampleStorage<C::Sample>,
{
    config: &'a TraceConfig<S, C>,
    exit_site: &'static SampleSite,
}

impl<'a, S, C> SpanGuard<'a, S, C>
where
    C: Clock,
    S: SampleStorage<C::Sample>,
{
    /// Records the enter sample and arms the exit sample.
    pub fn enter(
        config: &'a TraceConfig<S, C>,
        enter_site: &'static SampleSite,
        exit_site: &'static SampleSite,
    ) -> Self {
        config
            .storage()
            .add_sample(enter_site, config.clock().query());
        Self { config, exit_site }
    }
}

impl<S, C> Drop for SpanGuard<'_, S, C>
where
    C: Clock,
    S: SampleStorage<C::Sample>,
{
    fn drop(&mut self) {
        self.config
            .storage()
            .add_sample(self.exit_site, self.config.clock().query());
    }
}

/// Records a span covering the rest of the enclosing scope.
///
/// Expands to a uniquely typed guard local; bind it (`let _span = span!(…)`)
/// so it lives until the scope ends. The category and name must be string
/// literals — they become `static` [`SampleSite`]s at the expansion site.
///
/// With the `disabled` cargo feature, the macro expands to `()` and the
/// span compiles out entirely.
///
/// [`SampleSite`]: crate::SampleSite
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! span {
    ($config:expr, $category:expr, $name:expr) => {{
        static ENTER_SITE: $crate::SampleSite =
            $crate::SampleSite::new($category, $name, $crate::SampleKind::Enter);
        static EXIT_SITE: $crate::SampleSite =
            $crate::SampleSite::new($category, $name, $crate::SampleKind::Exit);
        $crate::SpanGuard::enter($config, &ENTER_SITE, &EXIT_SITE)
    }};
}

/// Disabled rendition: spans compile to nothing.
#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! span {
    ($config:expr, $category:expr, $name:expr) => {
        ()
    };
}
