pub mod box_pair_tester;
pub mod box_plane_tester;
pub mod levelset_tester;
pub mod sphere_box_tester;
pub mod sphere_pair_tester;
pub mod sphere_plane_tester;
pub mod union_tester;
